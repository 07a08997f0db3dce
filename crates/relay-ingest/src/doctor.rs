use anyhow::Result;

use crate::IngestConfig;

pub fn check_ingest(cfg: &IngestConfig) -> Result<()> {
    let det = cfg.detection_addr();
    let pin = cfg.pin_addr();
    anyhow::ensure!(det.port() != 0, "ingest.detection_port must be set");
    anyhow::ensure!(pin.port() != 0, "ingest.pin_port must be set");
    anyhow::ensure!(det != pin, "ingest.detection_port and ingest.pin_port must differ");
    let tick = cfg.tick().as_millis();
    anyhow::ensure!((20..=1000).contains(&tick), "ingest.tick_ms should be 20..1000");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_ingest(&IngestConfig::default()).unwrap();
    }

    #[test]
    fn clashing_ports_rejected() {
        let cfg = IngestConfig { detection_port: Some(7000), pin_port: Some(7000), ..Default::default() };
        assert!(check_ingest(&cfg).is_err());
    }
}
