// src/main.rs
// Replay driver for the decision maker.
//
// Loads a configuration and a scenario (map plus timed inbound messages),
// installs the map before the first tick, then replays the messages while
// ticking the node at a fixed rate and logging every output.
//
// Usage: decision_maker <scenario.yaml> [config.yaml]

use decision_maker::interface::Inbound;
use decision_maker::map::MapData;
use decision_maker::{DecisionConfig, DecisionMakerNode};
use log::{error, info};
use serde::Deserialize;
use std::error::Error;
use std::fs::File;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TimedMessage {
    /// Seconds since the start of the replay.
    at: f64,
    message: Inbound,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    map: Option<MapData>,
    #[serde(default = "default_tick_hz")]
    tick_hz: f64,
    /// Replay length in seconds.
    duration: f64,
    #[serde(default)]
    messages: Vec<TimedMessage>,
}

fn default_tick_hz() -> f64 {
    10.0
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(scenario_path) = args.next() else {
        error!("usage: decision_maker <scenario.yaml> [config.yaml]");
        return Err("missing scenario path".into());
    };
    let config = match args.next() {
        Some(path) => DecisionConfig::from_yaml_file(&path)?,
        None => DecisionConfig::default(),
    };
    let mut scenario: Scenario = serde_yaml::from_reader(File::open(&scenario_path)?)?;
    scenario.messages.sort_by(|a, b| a.at.total_cmp(&b.at));
    info!(
        "replaying {} ({} messages over {} s)",
        scenario_path,
        scenario.messages.len(),
        scenario.duration
    );

    let map = scenario.map.take().map(MapData::into_backend).transpose()?;
    let mut node = DecisionMakerNode::new(config, map)?;

    let period = Duration::from_secs_f64(1.0 / scenario.tick_hz.max(1e-3));
    let end = Duration::from_secs_f64(scenario.duration.max(0.0));
    let mut pending = scenario.messages.into_iter().peekable();
    let mut now = Duration::ZERO;

    while now <= end {
        while let Some(timed) = pending.next_if(|m| Duration::from_secs_f64(m.at.max(0.0)) <= now) {
            let topic = timed.message.topic();
            if let Err(e) = node.handle(timed.message) {
                error!("{}: {}", topic, e);
            }
        }
        node.tick(now);
        for output in node.drain_outputs() {
            info!("[{:>7.2}] {}: {:?}", now.as_secs_f64(), output.topic(), output);
        }
        now += period;
    }

    info!("final state:\n{}", node.state().joined());
    Ok(())
}
