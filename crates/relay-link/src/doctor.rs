use anyhow::Result;

use crate::endpoint::Endpoint;
use crate::LinkConfig;

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    Endpoint::parse(&cfg.endpoint, cfg.default_baud())?;
    anyhow::ensure!(cfg.default_baud() >= 9600, "link.baud too low");
    anyhow::ensure!(cfg.handshake_timeout().as_millis() >= 100, "link.handshake_timeout_ms too small");
    let recv = cfg.recv_timeout().as_millis();
    anyhow::ensure!((10..=5000).contains(&recv), "link.recv_timeout_ms should be 10..5000");
    anyhow::ensure!((1..=50).contains(&cfg.stream_rate_hz()), "link.stream_rate_hz should be 1..50");
    anyhow::ensure!(cfg.armed_mask() != 0, "link.armed_mask must select at least one bit");
    cfg.mode_table()?;
    Ok(())
}
