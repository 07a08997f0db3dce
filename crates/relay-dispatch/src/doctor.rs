use anyhow::Result;

use crate::DispatchConfig;

pub fn check_dispatch(cfg: &DispatchConfig) -> Result<()> {
    let (det, gim) = (cfg.detection_peer(), cfg.gimbal_peer());
    anyhow::ensure!(det.port() != 0, "dispatch.detection_peer needs a port");
    anyhow::ensure!(gim.port() != 0, "dispatch.gimbal_peer needs a port");
    anyhow::ensure!(!det.ip().is_unspecified(), "dispatch.detection_peer must be a concrete address");
    anyhow::ensure!(!gim.ip().is_unspecified(), "dispatch.gimbal_peer must be a concrete address");
    anyhow::ensure!(det != gim, "dispatch.detection_peer and dispatch.gimbal_peer must differ");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_dispatch(&DispatchConfig::default()).unwrap();
    }

    #[test]
    fn wildcard_peer_rejected() {
        let cfg = DispatchConfig { gimbal_peer: Some("0.0.0.0:6010".parse().unwrap()), ..Default::default() };
        assert!(check_dispatch(&cfg).is_err());
    }
}
