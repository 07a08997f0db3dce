//! Bench traffic for exercising a running relay without a vehicle or a
//! detector attached.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// Pins scatter around this point (lat, lon).
const PIN_ORIGIN: (f64, f64) = (-35.3632, 149.1652);
const PIN_SPREAD_DEG: f64 = 0.1;

const LABELS: [&str; 5] = ["car", "person", "bicycle", "dog", "tree"];
const STATES: [&str; 3] = ["moving", "static", "lost"];

fn jitter(rng: &mut impl Rng, center: f64) -> f64 {
    let v = center + rng.gen_range(-PIN_SPREAD_DEG..PIN_SPREAD_DEG);
    (v * 1e6).round() / 1e6
}

/// Cycles through the single-object, `pins` list and bare list shapes.
pub fn pin_payload(rng: &mut impl Rng, round: usize) -> Value {
    let (lat0, lon0) = PIN_ORIGIN;
    match round % 3 {
        0 => json!({"lat": jitter(rng, lat0), "lon": jitter(rng, lon0), "name": "test_pin"}),
        1 => {
            let pins: Vec<Value> = (0..3)
                .map(|i| json!([jitter(rng, lat0), jitter(rng, lon0), format!("pin_{}", i)]))
                .collect();
            json!({ "pins": pins })
        }
        _ => Value::Array(
            (0..2)
                .map(|i| json!([jitter(rng, lat0), jitter(rng, lon0), format!("lot_{}", i)]))
                .collect(),
        ),
    }
}

/// One detection frame of 1-4 square detections in a 640x480 image.
pub fn objects_payload(rng: &mut impl Rng) -> Value {
    let n = rng.gen_range(1..=4);
    let objects: Vec<Value> = (1..=n)
        .map(|id| {
            json!({
                "x": rng.gen_range(0..=640),
                "y": rng.gen_range(0..=480),
                "size": rng.gen_range(10..=100),
                "label": LABELS.choose(rng).copied().unwrap_or("car"),
                "id": id,
                "data": STATES.choose(rng).copied().unwrap_or("static"),
            })
        })
        .collect();
    json!({ "objects": objects })
}

#[derive(Debug, Clone, Copy)]
pub enum Traffic {
    Pins,
    Objects,
}

pub struct SimulateOpts {
    pub target: SocketAddr,
    /// 0 runs until interrupted.
    pub count: usize,
    pub interval: Duration,
    /// Also print selection packets sent back by the relay.
    pub control: Option<SocketAddr>,
}

pub async fn run(kind: Traffic, opts: SimulateOpts) -> Result<()> {
    let sock = UdpSocket::bind("0.0.0.0:0").await.context("bind simulate socket")?;
    let control = match opts.control {
        Some(addr) => Some(UdpSocket::bind(addr).await.with_context(|| format!("bind control socket {}", addr))?),
        None => None,
    };
    let mut rng = StdRng::from_entropy();
    info!("simulate: sending {:?} to {} every {:?}", kind, opts.target, opts.interval);

    let mut round = 0usize;
    loop {
        let payload = match kind {
            Traffic::Pins => pin_payload(&mut rng, round),
            Traffic::Objects => objects_payload(&mut rng),
        };
        let bytes = serde_json::to_vec(&payload)?;
        sock.send_to(&bytes, opts.target).await.context("simulate send")?;
        println!("sent: {}", payload);

        round += 1;
        if opts.count != 0 && round >= opts.count {
            break;
        }

        match &control {
            Some(ctl) => drain_control(ctl, opts.interval).await,
            None => tokio::time::sleep(opts.interval).await,
        }
    }
    Ok(())
}

/// Waits out one interval while printing anything arriving on `ctl`.
async fn drain_control(ctl: &UdpSocket, interval: Duration) {
    let deadline = tokio::time::Instant::now() + interval;
    let mut buf = [0u8; 2048];
    while let Ok(res) = tokio::time::timeout_at(deadline, ctl.recv_from(&mut buf)).await {
        match res {
            Ok((n, from)) => println!("control from {}: {}", from, String::from_utf8_lossy(&buf[..n])),
            Err(e) => debug!("simulate: control recv: {}", e),
        }
    }
}
