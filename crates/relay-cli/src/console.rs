//! Operator console: one intent per stdin line.

use anyhow::{bail, Context, Result};

use relay_proto::GimbalAxes;

pub const HELP: &str = "\
commands:
  connect [endpoint]     start a new vehicle session
  disconnect             stop the current session
  arm | disarm
  mode <NAME>            e.g. mode GUIDED
  modes                  list flight modes the link knows
  gimbal <r> <p> <y> <z> payload gimbal axes
  select <id>            track an object
  tracks                 list current tracks
  status                 link status and last telemetry
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Connect(Option<String>),
    Disconnect,
    Arm,
    Disarm,
    Mode(String),
    Modes,
    Gimbal(GimbalAxes),
    Select(i64),
    Tracks,
    Status,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Intent>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else { return Ok(None) };
    let args: Vec<&str> = words.collect();

    let intent = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("connect", []) => Intent::Connect(None),
        ("connect", [ep]) => Intent::Connect(Some(ep.to_string())),
        ("disconnect", []) => Intent::Disconnect,
        ("arm", []) => Intent::Arm,
        ("disarm", []) => Intent::Disarm,
        ("mode", [name]) => Intent::Mode(name.to_string()),
        ("modes", []) => Intent::Modes,
        ("gimbal", [r, p, y, z]) => Intent::Gimbal(GimbalAxes {
            roll: axis("roll", r)?,
            pitch: axis("pitch", p)?,
            yaw: axis("yaw", y)?,
            zoom: axis("zoom", z)?,
        }),
        ("select", [id]) => Intent::Select(id.parse().with_context(|| format!("bad track id '{}'", id))?),
        ("tracks", []) => Intent::Tracks,
        ("status", []) => Intent::Status,
        ("help" | "?", _) => Intent::Help,
        ("quit" | "exit", []) => Intent::Quit,
        (v, _) => bail!("can't parse '{}' (try 'help')", v),
    };
    Ok(Some(intent))
}

fn axis(name: &str, v: &str) -> Result<f32> {
    let x: f32 = v.parse().with_context(|| format!("bad {} '{}'", name, v))?;
    anyhow::ensure!(x.is_finite(), "bad {} '{}'", name, v);
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_verbs() {
        assert_eq!(parse("arm").unwrap(), Some(Intent::Arm));
        assert_eq!(parse("  DISARM ").unwrap(), Some(Intent::Disarm));
        assert_eq!(parse("tracks").unwrap(), Some(Intent::Tracks));
        assert_eq!(parse("quit").unwrap(), Some(Intent::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn mode_keeps_name_as_typed() {
        assert_eq!(parse("mode loiter").unwrap(), Some(Intent::Mode("loiter".into())));
        assert!(parse("mode").is_err());
        assert_eq!(parse("modes").unwrap(), Some(Intent::Modes));
    }

    #[test]
    fn gimbal_takes_four_numbers() {
        assert_eq!(
            parse("gimbal 0 -12.5 90 2").unwrap(),
            Some(Intent::Gimbal(GimbalAxes { roll: 0.0, pitch: -12.5, yaw: 90.0, zoom: 2.0 }))
        );
        assert!(parse("gimbal 1 2 3").is_err());
        assert!(parse("gimbal 1 2 x 4").is_err());
        assert!(parse("gimbal 1 2 NaN 4").is_err());
    }

    #[test]
    fn select_and_connect() {
        assert_eq!(parse("select -3").unwrap(), Some(Intent::Select(-3)));
        assert!(parse("select car").is_err());
        assert_eq!(parse("connect").unwrap(), Some(Intent::Connect(None)));
        assert_eq!(
            parse("connect tcp:10.0.0.2:5760").unwrap(),
            Some(Intent::Connect(Some("tcp:10.0.0.2:5760".into())))
        );
    }

    #[test]
    fn unknown_verb() {
        assert!(parse("takeoff 10").is_err());
    }
}
