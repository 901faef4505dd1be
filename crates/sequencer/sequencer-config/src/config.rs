use serde::Deserialize;
use std::path::Path;

/// Immutable sequencer configuration, from the `<Sequencer>` node of the
/// shared exchange XML document.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub port: u16,
    pub blocking_queue_size: usize,
    /// Queue the gateway publishes into; this process consumes it.
    pub sequencer_queue: String,
    /// Queue toward the matching engine; owned by the downstream stage.
    pub matching_engine_queue: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] quick_xml::DeError),
}

#[derive(Deserialize)]
struct ExchangeDoc {
    #[serde(rename = "Sequencer")]
    sequencer: SequencerNode,
}

#[derive(Deserialize)]
struct SequencerNode {
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "BlockingQueue")]
    blocking_queue: BlockingQueueNode,
    #[serde(rename = "Ipc")]
    ipc: IpcNode,
}

#[derive(Deserialize)]
struct BlockingQueueNode {
    #[serde(rename = "Size")]
    size: usize,
}

#[derive(Deserialize)]
struct IpcNode {
    #[serde(rename = "SequencerQueue")]
    sequencer_queue: String,
    #[serde(rename = "MatchingEngineQueue")]
    matching_engine_queue: String,
}

impl SequencerConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let doc: ExchangeDoc = quick_xml::de::from_str(text)?;
        let node = doc.sequencer;
        Ok(Self {
            port: node.port,
            blocking_queue_size: node.blocking_queue.size,
            sequencer_queue: node.ipc.sequencer_queue,
            matching_engine_queue: node.ipc.matching_engine_queue,
        })
    }
}
