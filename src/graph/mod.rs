//! Declarative pipeline topology.
//!
//! A `Topology` is a flat list of named stages plus directed links, produced
//! once per build from `BuildParams` and validated before any media backend
//! sees it. Backends instantiate stages by factory name and never make
//! topology decisions of their own.
//!
//! Live mode:
//!
//! ```text
//! live_src ! live_caps ! live_sync ──────────────────────────────────────┐
//!                                                                         input_switch ! segment ! parser ! tail_queue ! <sink>
//! fallback_src ! fallback_caps ! fallback_overlay ! fallback_encoder ! ──┘
//!     fallback_encoded_caps ! fallback_sync
//! ```
//!
//! Default mode drops the live branch and the switch; the synthetic branch
//! feeds the parser directly. `<sink>` is `payloader ! udp_sink` for
//! `udp://` destinations and `rtsp_sink` otherwise.

pub mod caps;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use crate::address::StreamAddress;
use crate::codec::{EncoderProfile, FALLBACK_BITRATE_KBPS, RTP_PAYLOAD_TYPE};
use caps::{CapsSpec, CapsValue};

pub const LIVE_SOURCE: &str = "live_src";
pub const FALLBACK_SOURCE: &str = "fallback_src";
pub const INPUT_SWITCH: &str = "input_switch";

/// Text rendered over the synthetic pattern.
pub const FALLBACK_OVERLAY_TEXT: &str = "Camera not detected!";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// Synthetic pattern only.
    Default,
    /// Injected frames with a synthetic fallback behind an input switch.
    #[default]
    Live,
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Capability tag of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Filter,
    Overlay,
    Encoder,
    Parser,
    Payloader,
    Sink,
    Switch,
    Identity,
    Queue,
}

/// Which part of the graph a stage belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BranchRole {
    Live,
    Fallback,
    Tail,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    /// Strings and enum/flag nicks.
    Str(String),
    Caps(CapsSpec),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Str(value) => write!(f, "{}", value),
            Self::Caps(caps) => write!(f, "{}", caps),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub factory: String,
    pub kind: StageKind,
    pub branch: BranchRole,
    pub properties: Vec<(String, PropValue)>,
}

impl StageSpec {
    pub fn new(name: &str, factory: &str, kind: StageKind, branch: BranchRole) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            kind,
            branch,
            properties: Vec::new(),
        }
    }

    fn prop(mut self, name: &str, value: PropValue) -> Self {
        self.properties.push((name.to_string(), value));
        self
    }

    fn flag(self, name: &str, value: bool) -> Self {
        self.prop(name, PropValue::Bool(value))
    }

    fn int(self, name: &str, value: i64) -> Self {
        self.prop(name, PropValue::Int(value))
    }

    fn text(self, name: &str, value: &str) -> Self {
        self.prop(name, PropValue::Str(value.to_string()))
    }

    fn caps(self, caps: CapsSpec) -> Self {
        self.prop("caps", PropValue::Caps(caps))
    }

    pub fn property(&self, name: &str) -> Option<&PropValue> {
        self.properties
            .iter()
            .find(|(prop, _)| prop == name)
            .map(|(_, value)| value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub from: String,
    pub to: String,
}

// ----------------------------------------------------------------------------
// Build parameters
// ----------------------------------------------------------------------------

/// Everything a build needs. Produced by the owning node from its stream
/// parameters.
#[derive(Clone, Debug)]
pub struct BuildParams {
    pub mode: TopologyMode,
    pub profile: EncoderProfile,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bitrate the live producer encodes at, in bits per second. The live
    /// branch only parses and payloads, so no stage is configured from it;
    /// it is validated and logged with the build. The fallback encoder runs
    /// at its own fixed rate.
    pub bitrate: u32,
    pub stream_address: String,
    /// Validate the RTSP server certificate. Off unless configured.
    pub rtsp_tls_validation: bool,
}

impl BuildParams {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("invalid frame size {}x{}", self.width, self.height);
        }
        if self.fps == 0 {
            bail!("frame rate must be greater than zero");
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Topology
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Topology {
    mode: TopologyMode,
    profile: EncoderProfile,
    fps: u32,
    address: StreamAddress,
    stages: Vec<StageSpec>,
    links: Vec<Link>,
}

impl Topology {
    /// Evaluate the descriptor for `params` and validate the result.
    pub fn build(params: &BuildParams) -> Result<Self> {
        params.validate()?;
        let address = StreamAddress::parse(&params.stream_address)?;

        let mut builder = TopologyBuilder::default();
        let (_, fallback_last) = builder.chain(fallback_branch(params))?;

        let upstream = match params.mode {
            TopologyMode::Live => {
                let (_, live_last) = builder.chain(live_branch(params))?;
                builder.push(StageSpec::new(
                    INPUT_SWITCH,
                    "input-selector",
                    StageKind::Switch,
                    BranchRole::Tail,
                ));
                // Live first: it takes the switch's first input.
                builder.link(&live_last, INPUT_SWITCH);
                builder.link(&fallback_last, INPUT_SWITCH);
                INPUT_SWITCH.to_string()
            }
            TopologyMode::Default => fallback_last,
        };

        let (tail_first, _) = builder.chain(tail_stages(params, &address))?;
        builder.link(&upstream, &tail_first);

        let topology = Self {
            mode: params.mode,
            profile: params.profile,
            fps: params.fps,
            address,
            stages: builder.stages,
            links: builder.links,
        };
        topology.validate()?;
        Ok(topology)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        mode: TopologyMode,
        address: StreamAddress,
        stages: Vec<StageSpec>,
        links: Vec<Link>,
    ) -> Self {
        Self {
            mode,
            profile: EncoderProfile::H264,
            fps: 25,
            address,
            stages,
            links,
        }
    }

    /// Check structural invariants: unique names, resolvable links, single
    /// inputs except on the switch, single outputs, exactly one sink reached
    /// from every stage, and no cycles.
    pub fn validate(&self) -> Result<()> {
        let mut index = HashMap::new();
        for stage in &self.stages {
            if index.insert(stage.name.as_str(), stage).is_some() {
                bail!("duplicate stage name '{}'", stage.name);
            }
        }

        let mut inputs: HashMap<&str, usize> = HashMap::new();
        let mut outputs: HashMap<&str, Vec<&str>> = HashMap::new();
        for link in &self.links {
            for end in [&link.from, &link.to] {
                if !index.contains_key(end.as_str()) {
                    bail!("link {} -> {} references unknown stage '{}'", link.from, link.to, end);
                }
            }
            *inputs.entry(link.to.as_str()).or_default() += 1;
            outputs
                .entry(link.from.as_str())
                .or_default()
                .push(link.to.as_str());
        }

        let sinks: Vec<&StageSpec> = self
            .stages
            .iter()
            .filter(|stage| stage.kind == StageKind::Sink)
            .collect();
        let sink = match sinks.as_slice() {
            [sink] => *sink,
            [] => bail!("topology has no sink"),
            _ => bail!("topology has {} sinks; exactly one is allowed", sinks.len()),
        };

        let switches = self
            .stages
            .iter()
            .filter(|stage| stage.kind == StageKind::Switch)
            .count();
        match (self.mode, switches) {
            (TopologyMode::Live, 1) | (TopologyMode::Default, 0) => {}
            (mode, count) => bail!("{} topology cannot have {} input switches", mode, count),
        }

        for stage in &self.stages {
            let fan_in = inputs.get(stage.name.as_str()).copied().unwrap_or(0);
            let fan_out = outputs.get(stage.name.as_str()).map_or(0, Vec::len);
            match stage.kind {
                StageKind::Source if fan_in != 0 => {
                    bail!("source '{}' cannot have inputs", stage.name)
                }
                StageKind::Switch if fan_in < 2 => {
                    bail!("switch '{}' needs at least two inputs", stage.name)
                }
                StageKind::Source | StageKind::Switch => {}
                _ if fan_in != 1 => {
                    bail!("stage '{}' has {} inputs; expected one", stage.name, fan_in)
                }
                _ => {}
            }
            match stage.kind {
                StageKind::Sink if fan_out != 0 => {
                    bail!("sink '{}' cannot have outputs", stage.name)
                }
                StageKind::Sink => {}
                _ if fan_out != 1 => {
                    bail!("stage '{}' has {} outputs; expected one", stage.name, fan_out)
                }
                _ => {}
            }
        }

        // Kahn's algorithm: every stage must be ordered, otherwise a cycle exists.
        let mut pending: HashMap<&str, usize> = self
            .stages
            .iter()
            .map(|stage| (stage.name.as_str(), inputs.get(stage.name.as_str()).copied().unwrap_or(0)))
            .collect();
        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut ordered = 0usize;
        while let Some(name) = ready.pop_front() {
            ordered += 1;
            for next in outputs.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }
        if ordered != self.stages.len() {
            bail!("topology contains a cycle");
        }

        // With single outputs and no cycles, following outputs from any stage
        // terminates; it must terminate at the sink.
        for stage in &self.stages {
            let mut current = stage.name.as_str();
            let mut seen = HashSet::new();
            while let Some(next) = outputs.get(current).and_then(|next| next.first()) {
                if !seen.insert(current) {
                    bail!("topology contains a cycle");
                }
                current = *next;
            }
            if current != sink.name {
                bail!("stage '{}' does not reach sink '{}'", stage.name, sink.name);
            }
        }

        if self.mode == TopologyMode::Live && self.live_source().is_none() {
            bail!("live topology has no live source");
        }
        Ok(())
    }

    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    pub fn profile(&self) -> EncoderProfile {
        self.profile
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn address(&self) -> &StreamAddress {
        &self.address
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Source of the injected branch, present only in live mode.
    pub fn live_source(&self) -> Option<&StageSpec> {
        self.stages
            .iter()
            .find(|stage| stage.kind == StageKind::Source && stage.branch == BranchRole::Live)
    }

    pub fn switch(&self) -> Option<&StageSpec> {
        self.stages
            .iter()
            .find(|stage| stage.kind == StageKind::Switch)
    }

    pub fn sink(&self) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.kind == StageKind::Sink)
    }

    /// Upstream stages feeding the switch, in link order, with their branch.
    pub fn switch_inputs(&self) -> Vec<(BranchRole, &str)> {
        let Some(switch) = self.switch() else {
            return Vec::new();
        };
        self.links
            .iter()
            .filter(|link| link.to == switch.name)
            .filter_map(|link| {
                self.stage(&link.from)
                    .map(|stage| (stage.branch, stage.name.as_str()))
            })
            .collect()
    }

    /// Time between frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }

    /// One-line rendering of each chain, e.g. `live_src(appsrc) ! ... ! input_switch`.
    pub fn describe(&self) -> String {
        let next: HashMap<&str, &str> = self
            .links
            .iter()
            .map(|link| (link.from.as_str(), link.to.as_str()))
            .collect();
        let mut starts: Vec<&StageSpec> = self
            .stages
            .iter()
            .filter(|stage| stage.kind == StageKind::Source)
            .collect();
        starts.extend(self.switch());

        let mut chains = Vec::new();
        for start in starts {
            let mut parts = vec![format!("{}({})", start.name, start.factory)];
            let mut current = start.name.as_str();
            while let Some(to) = next.get(current) {
                let Some(stage) = self.stage(to) else { break };
                parts.push(format!("{}({})", stage.name, stage.factory));
                if stage.kind == StageKind::Switch {
                    break;
                }
                current = *to;
            }
            chains.push(parts.join(" ! "));
        }
        chains.join("; ")
    }
}

// ----------------------------------------------------------------------------
// Descriptor evaluation
// ----------------------------------------------------------------------------

#[derive(Default)]
struct TopologyBuilder {
    stages: Vec<StageSpec>,
    links: Vec<Link>,
}

impl TopologyBuilder {
    fn push(&mut self, stage: StageSpec) {
        self.stages.push(stage);
    }

    fn link(&mut self, from: &str, to: &str) {
        self.links.push(Link {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    /// Add stages linked in order; returns the first and last stage names.
    fn chain(&mut self, stages: Vec<StageSpec>) -> Result<(String, String)> {
        let first = stages
            .first()
            .map(|stage| stage.name.clone())
            .ok_or_else(|| anyhow!("empty stage chain"))?;
        let mut previous: Option<String> = None;
        for stage in stages {
            let name = stage.name.clone();
            if let Some(prev) = &previous {
                self.link(prev, &name);
            }
            self.push(stage);
            previous = Some(name);
        }
        Ok((first, previous.unwrap_or_default()))
    }
}

fn fallback_branch(params: &BuildParams) -> Vec<StageSpec> {
    let profile = params.profile;
    let pattern = match params.mode {
        TopologyMode::Default => "black",
        TopologyMode::Live => "chroma-zone-plate",
    };

    let encoder = StageSpec::new(
        "fallback_encoder",
        profile.encoder_factory(),
        StageKind::Encoder,
        BranchRole::Fallback,
    )
    .int("bitrate", FALLBACK_BITRATE_KBPS)
    .text("speed-preset", "superfast")
    .text("tune", "zerolatency");

    let mut encoded = CapsSpec::new(profile.media_type()).str_field("stream-format", "byte-stream");
    if let Some(level) = profile.fallback_profile() {
        encoded = encoded.str_field("profile", level);
    }

    let mut stages = vec![
        StageSpec::new(
            FALLBACK_SOURCE,
            "videotestsrc",
            StageKind::Source,
            BranchRole::Fallback,
        )
        .flag("is-live", true)
        .text("pattern", pattern),
        StageSpec::new(
            "fallback_caps",
            "capsfilter",
            StageKind::Filter,
            BranchRole::Fallback,
        )
        .caps(caps::raw_video(params.width, params.height, params.fps)),
        StageSpec::new(
            "fallback_overlay",
            "textoverlay",
            StageKind::Overlay,
            BranchRole::Fallback,
        )
        .text("text", FALLBACK_OVERLAY_TEXT)
        .text("valignment", "center")
        .text("halignment", "center")
        .text("font-desc", "Sans, 42"),
        encoder,
        StageSpec::new(
            "fallback_encoded_caps",
            "capsfilter",
            StageKind::Filter,
            BranchRole::Fallback,
        )
        .caps(encoded),
    ];
    if params.mode == TopologyMode::Live {
        stages.push(
            StageSpec::new(
                "fallback_sync",
                "identity",
                StageKind::Identity,
                BranchRole::Fallback,
            )
            .flag("sync", false),
        );
    }
    stages
}

fn live_branch(params: &BuildParams) -> Vec<StageSpec> {
    let profile = params.profile;
    let input_caps = CapsSpec::new(profile.media_type())
        .int_field("width", i64::from(params.width))
        .int_field("height", i64::from(params.height))
        .field("framerate", CapsValue::Fraction(params.fps as i32, 1));
    let producer_caps = CapsSpec::new(profile.media_type())
        .str_field("profile", profile.live_profile())
        .str_field("stream-format", "byte-stream");

    vec![
        StageSpec::new(LIVE_SOURCE, "appsrc", StageKind::Source, BranchRole::Live)
            .flag("do-timestamp", true)
            .flag("is-live", true)
            .flag("block", false)
            .text("stream-type", "stream")
            .text("format", "time")
            .caps(input_caps),
        StageSpec::new("live_caps", "capsfilter", StageKind::Filter, BranchRole::Live)
            .caps(producer_caps),
        StageSpec::new("live_sync", "identity", StageKind::Identity, BranchRole::Live)
            .flag("sync", false),
    ]
}

fn tail_stages(params: &BuildParams, address: &StreamAddress) -> Vec<StageSpec> {
    let profile = params.profile;
    let mut stages = Vec::new();
    if params.mode == TopologyMode::Live {
        // Both inputs restart their segments when switched; present one to the parser.
        stages.push(
            StageSpec::new("segment", "identity", StageKind::Identity, BranchRole::Tail)
                .flag("silent", true)
                .flag("single-segment", true),
        );
    }
    stages.push(StageSpec::new(
        "parser",
        profile.parser_factory(),
        StageKind::Parser,
        BranchRole::Tail,
    ));
    stages.push(StageSpec::new(
        "tail_queue",
        "queue",
        StageKind::Queue,
        BranchRole::Tail,
    ));

    match address {
        StreamAddress::Udp { host, port } => {
            stages.push(
                StageSpec::new(
                    "payloader",
                    profile.payloader_factory(),
                    StageKind::Payloader,
                    BranchRole::Tail,
                )
                .int("pt", RTP_PAYLOAD_TYPE)
                .int("config-interval", 1),
            );
            stages.push(
                StageSpec::new("udp_sink", "udpsink", StageKind::Sink, BranchRole::Tail)
                    .text("host", host)
                    .int("port", i64::from(*port)),
            );
        }
        StreamAddress::Rtsp { location } => {
            let validation = if params.rtsp_tls_validation {
                PropValue::Str("validate-all".to_string())
            } else {
                PropValue::Int(0)
            };
            stages.push(
                StageSpec::new("rtsp_sink", "rtspclientsink", StageKind::Sink, BranchRole::Tail)
                    .text("location", location)
                    .text("protocols", "tcp")
                    .prop("tls-validation-flags", validation),
            );
        }
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: TopologyMode, profile: EncoderProfile, address: &str) -> BuildParams {
        BuildParams {
            mode,
            profile,
            width: 1280,
            height: 720,
            fps: 25,
            bitrate: 3_000_000,
            stream_address: address.to_string(),
            rtsp_tls_validation: false,
        }
    }

    fn factories(topology: &Topology) -> Vec<&str> {
        topology
            .stages()
            .iter()
            .map(|stage| stage.factory.as_str())
            .collect()
    }

    #[test]
    fn every_mode_profile_and_sink_combination_validates() -> Result<()> {
        for mode in [TopologyMode::Default, TopologyMode::Live] {
            for profile in [EncoderProfile::H264, EncoderProfile::H265] {
                for address in ["udp://127.0.0.1:5600", "rtsp://127.0.0.1:8554/cam"] {
                    let topology = Topology::build(&params(mode, profile, address))?;
                    assert_eq!(topology.mode(), mode);
                    assert!(factories(&topology).contains(&profile.parser_factory()));
                    assert!(factories(&topology).contains(&profile.encoder_factory()));
                }
            }
        }
        Ok(())
    }

    #[test]
    fn live_udp_topology_links_live_first_into_switch() -> Result<()> {
        let topology = Topology::build(&params(
            TopologyMode::Live,
            EncoderProfile::H264,
            "udp://10.0.0.2:5600",
        ))?;

        assert_eq!(
            topology.switch_inputs(),
            vec![
                (BranchRole::Live, "live_sync"),
                (BranchRole::Fallback, "fallback_sync")
            ]
        );
        let source = topology.live_source().expect("live source");
        assert_eq!(source.factory, "appsrc");
        assert_eq!(source.property("block"), Some(&PropValue::Bool(false)));

        let payloader = topology.stage("payloader").expect("payloader");
        assert_eq!(payloader.factory, "rtph264pay");
        assert_eq!(payloader.property("pt"), Some(&PropValue::Int(96)));

        let sink = topology.sink().expect("sink");
        assert_eq!(sink.factory, "udpsink");
        assert_eq!(sink.property("host"), Some(&PropValue::Str("10.0.0.2".into())));
        assert_eq!(sink.property("port"), Some(&PropValue::Int(5600)));
        Ok(())
    }

    #[test]
    fn default_rtsp_topology_has_no_switch_or_live_source() -> Result<()> {
        let topology = Topology::build(&params(
            TopologyMode::Default,
            EncoderProfile::H265,
            "rtsp://relay:8554/stream",
        ))?;

        assert!(topology.switch().is_none());
        assert!(topology.live_source().is_none());
        assert!(topology.stage("payloader").is_none());

        let sink = topology.sink().expect("sink");
        assert_eq!(sink.factory, "rtspclientsink");
        assert_eq!(sink.property("protocols"), Some(&PropValue::Str("tcp".into())));
        assert_eq!(sink.property("tls-validation-flags"), Some(&PropValue::Int(0)));
        assert_eq!(
            topology.describe(),
            "fallback_src(videotestsrc) ! fallback_caps(capsfilter) ! fallback_overlay(textoverlay) \
             ! fallback_encoder(x265enc) ! fallback_encoded_caps(capsfilter) ! parser(h265parse) \
             ! tail_queue(queue) ! rtsp_sink(rtspclientsink)"
        );
        Ok(())
    }

    #[test]
    fn tls_validation_flag_reaches_rtsp_sink() -> Result<()> {
        let mut p = params(TopologyMode::Live, EncoderProfile::H264, "rtsps://relay/cam");
        p.rtsp_tls_validation = true;
        let topology = Topology::build(&p)?;
        let sink = topology.sink().expect("sink");
        assert_eq!(
            sink.property("tls-validation-flags"),
            Some(&PropValue::Str("validate-all".into()))
        );
        Ok(())
    }

    #[test]
    fn caps_follow_requested_geometry() -> Result<()> {
        let mut p = params(TopologyMode::Live, EncoderProfile::H265, "udp://10.0.0.2:5600");
        p.width = 640;
        p.height = 480;
        p.fps = 30;
        let topology = Topology::build(&p)?;

        let source = topology.live_source().expect("live source");
        let Some(PropValue::Caps(caps)) = source.property("caps") else {
            panic!("live source has no caps");
        };
        assert_eq!(caps.media_type(), "video/x-h265");
        assert_eq!(caps.get("width"), Some(&CapsValue::Int(640)));
        assert_eq!(caps.get("framerate"), Some(&CapsValue::Fraction(30, 1)));
        assert_eq!(topology.frame_interval(), Duration::from_nanos(33_333_333));
        Ok(())
    }

    #[test]
    fn producer_bitrate_does_not_configure_any_stage() -> Result<()> {
        let mut low = params(TopologyMode::Live, EncoderProfile::H264, "udp://127.0.0.1:5600");
        low.bitrate = 500_000;
        let mut high = low.clone();
        high.bitrate = 20_000_000;

        let low = Topology::build(&low)?;
        let high = Topology::build(&high)?;
        assert_eq!(low.stages(), high.stages());
        assert_eq!(
            low.stage("fallback_encoder")
                .and_then(|stage| stage.property("bitrate")),
            Some(&PropValue::Int(FALLBACK_BITRATE_KBPS))
        );
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut p = params(TopologyMode::Live, EncoderProfile::H264, "");
        assert!(Topology::build(&p).is_err());

        p.stream_address = "udp://10.0.0.2:5600".into();
        p.width = 0;
        assert!(Topology::build(&p).is_err());

        p.width = 1280;
        p.fps = 0;
        assert!(Topology::build(&p).is_err());
    }

    fn stage(name: &str, kind: StageKind) -> StageSpec {
        StageSpec::new(name, "identity", kind, BranchRole::Tail)
    }

    fn link(from: &str, to: &str) -> Link {
        Link {
            from: from.into(),
            to: to.into(),
        }
    }

    fn udp() -> StreamAddress {
        StreamAddress::Udp {
            host: "127.0.0.1".into(),
            port: 5600,
        }
    }

    #[test]
    fn validate_rejects_cycles() {
        let topology = Topology::from_parts(
            TopologyMode::Default,
            udp(),
            vec![
                stage("a", StageKind::Identity),
                stage("b", StageKind::Identity),
                stage("sink", StageKind::Sink),
            ],
            vec![link("a", "b"), link("b", "a")],
        );
        let err = topology.validate().unwrap_err().to_string();
        assert!(err.contains("cycle") || err.contains("sink"), "{}", err);
    }

    #[test]
    fn validate_rejects_two_sinks() {
        let topology = Topology::from_parts(
            TopologyMode::Default,
            udp(),
            vec![
                stage("src", StageKind::Source),
                stage("sink_a", StageKind::Sink),
                stage("sink_b", StageKind::Sink),
            ],
            vec![link("src", "sink_a")],
        );
        assert!(topology.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_links_and_duplicates() {
        let dangling = Topology::from_parts(
            TopologyMode::Default,
            udp(),
            vec![stage("src", StageKind::Source), stage("sink", StageKind::Sink)],
            vec![link("src", "missing")],
        );
        assert!(dangling.validate().is_err());

        let duplicate = Topology::from_parts(
            TopologyMode::Default,
            udp(),
            vec![
                stage("src", StageKind::Source),
                stage("src", StageKind::Identity),
                stage("sink", StageKind::Sink),
            ],
            vec![link("src", "sink")],
        );
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn validate_rejects_live_mode_without_switch() {
        let topology = Topology::from_parts(
            TopologyMode::Live,
            udp(),
            vec![stage("src", StageKind::Source), stage("sink", StageKind::Sink)],
            vec![link("src", "sink")],
        );
        assert!(topology.validate().is_err());
    }
}
