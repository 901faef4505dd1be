use serde::Deserialize;
use std::path::Path;

/// Immutable gateway configuration, read once at startup from the
/// `<Gateway>` node of the exchange XML document and passed by reference to
/// every component. Every child element is required; a missing one fails the
/// parse.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub blocking_queue_size: usize,
    pub max_event_size: usize,
    pub backlog_size: usize,
    pub sequencer_queue: String,
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

// The on-disk shape:
//
// <Exchange>
//   <Gateway>
//     <Port>9000</Port>
//     <BlockingQueue><Size>4096</Size></BlockingQueue>
//     <Fix><MaxEventSize>100</MaxEventSize><BacklogSize>10</BacklogSize></Fix>
//     <Ipc>
//       <SequencerQueue>seq_in</SequencerQueue>
//       <MatchingEngineQueue>engine_in</MatchingEngineQueue>
//     </Ipc>
//   </Gateway>
//   ...
// </Exchange>

#[derive(Deserialize)]
struct ExchangeDoc {
    #[serde(rename = "Gateway")]
    gateway: GatewayNode,
}

#[derive(Deserialize)]
struct GatewayNode {
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "BlockingQueue")]
    blocking_queue: BlockingQueueNode,
    #[serde(rename = "Fix")]
    fix: FixNode,
    #[serde(rename = "Ipc")]
    ipc: IpcNode,
}

#[derive(Deserialize)]
struct BlockingQueueNode {
    #[serde(rename = "Size")]
    size: usize,
}

#[derive(Deserialize)]
struct FixNode {
    #[serde(rename = "MaxEventSize")]
    max_event_size: usize,
    #[serde(rename = "BacklogSize")]
    backlog_size: usize,
}

#[derive(Deserialize)]
struct IpcNode {
    #[serde(rename = "SequencerQueue")]
    sequencer_queue: String,
    #[serde(rename = "MatchingEngineQueue")]
    matching_engine_queue: String,
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let doc: ExchangeDoc = quick_xml::de::from_str(text)?;
        let node = doc.gateway;
        Ok(Self {
            port: node.port,
            blocking_queue_size: node.blocking_queue.size,
            max_event_size: node.fix.max_event_size,
            backlog_size: node.fix.backlog_size,
            sequencer_queue: node.ipc.sequencer_queue,
            matching_engine_queue: node.ipc.matching_engine_queue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        <Exchange>
          <Gateway>
            <Port>9000</Port>
            <BlockingQueue><Size>4096</Size></BlockingQueue>
            <Fix><MaxEventSize>100</MaxEventSize><BacklogSize>10</BacklogSize></Fix>
            <Ipc>
              <SequencerQueue>seq_in</SequencerQueue>
              <MatchingEngineQueue>engine_in</MatchingEngineQueue>
            </Ipc>
          </Gateway>
          <Sequencer>
            <Port>8002</Port>
            <BlockingQueue><Size>1024</Size></BlockingQueue>
            <Ipc>
              <SequencerQueue>seq_in</SequencerQueue>
              <MatchingEngineQueue>engine_in</MatchingEngineQueue>
            </Ipc>
          </Sequencer>
        </Exchange>
    "#;

    #[test]
    fn parses_gateway_node() {
        let cfg = GatewayConfig::parse(SAMPLE).expect("parse");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.blocking_queue_size, 4096);
        assert_eq!(cfg.max_event_size, 100);
        assert_eq!(cfg.backlog_size, 10);
        assert_eq!(cfg.sequencer_queue, "seq_in");
        assert_eq!(cfg.matching_engine_queue, "engine_in");
    }

    #[test]
    fn missing_child_is_fatal() {
        let text = r#"
            <Exchange>
              <Gateway>
                <Port>9000</Port>
                <BlockingQueue><Size>4096</Size></BlockingQueue>
                <Fix><MaxEventSize>100</MaxEventSize></Fix>
                <Ipc>
                  <SequencerQueue>seq_in</SequencerQueue>
                  <MatchingEngineQueue>engine_in</MatchingEngineQueue>
                </Ipc>
              </Gateway>
            </Exchange>
        "#;
        assert!(matches!(
            GatewayConfig::parse(text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn non_numeric_port_is_fatal() {
        let text = SAMPLE.replace("<Port>9000</Port>", "<Port>lots</Port>");
        assert!(GatewayConfig::parse(&text).is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(SAMPLE.as_bytes()).expect("write");
        let path = file.path().to_str().expect("utf8 path").to_string();
        let cfg = GatewayConfig::load(path).expect("load");
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = GatewayConfig::load("/definitely/not/here.xml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
