//! GStreamer media backend.
//!
//! Builds one element per `StageSpec` by factory name, applies properties
//! through the runtime's string deserializers (enum nicks, flags, numbers) and
//! caps through `Caps::from_str`, then links the graph. Inputs of the
//! `input-selector` are requested explicitly so each branch keeps its pad.
//!
//! `need-data` from the live `appsrc` and bus messages are forwarded into the
//! controller's event channel; nothing runs a GLib main loop.

use anyhow::{anyhow, bail, Context, Result};
use gstreamer::prelude::*;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{EncodedBuffer, EventSender, FlowError, FlowResult, MediaBackend, MediaPipeline, PipelineEvent};
use crate::graph::{BranchRole, PropValue, StageKind, Topology};
use crate::watchdog::ActiveBranch;

const DOT_FILE_NAME: &str = "stream_pipeline";

pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        Ok(Self)
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn has_factory(&self, factory: &str) -> bool {
        gstreamer::ElementFactory::find(factory).is_some()
    }

    fn instantiate(
        &mut self,
        topology: &Topology,
        events: EventSender,
    ) -> Result<Box<dyn MediaPipeline>> {
        let pipeline = gstreamer::Pipeline::with_name("stream");
        let mut elements: HashMap<&str, gstreamer::Element> = HashMap::new();

        for stage in topology.stages() {
            let element = gstreamer::ElementFactory::make(&stage.factory)
                .name(stage.name.as_str())
                .build()
                .with_context(|| format!("create '{}' for stage '{}'", stage.factory, stage.name))?;
            for (name, value) in &stage.properties {
                apply_property(&element, &stage.name, name, value)?;
            }
            pipeline
                .add(&element)
                .with_context(|| format!("add stage '{}' to pipeline", stage.name))?;
            elements.insert(stage.name.as_str(), element);
        }

        let switch = topology
            .switch()
            .and_then(|stage| elements.get(stage.name.as_str()).cloned());
        let mut pads = HashMap::new();
        for link in topology.links() {
            let from = element_named(&elements, &link.from)?;
            let to = element_named(&elements, &link.to)?;
            let into_switch = topology
                .stage(&link.to)
                .is_some_and(|stage| stage.kind == StageKind::Switch);
            if !into_switch {
                from.link(to)
                    .with_context(|| format!("link {} -> {}", link.from, link.to))?;
                continue;
            }

            let src_pad = from
                .static_pad("src")
                .ok_or_else(|| anyhow!("stage '{}' has no src pad", link.from))?;
            let sink_pad = to
                .request_pad_simple("sink_%u")
                .ok_or_else(|| anyhow!("switch '{}' refused a new input", link.to))?;
            src_pad
                .link(&sink_pad)
                .map_err(|e| anyhow!("link {} -> {}: {:?}", link.from, link.to, e))?;
            let branch = match topology.stage(&link.from).map(|stage| stage.branch) {
                Some(BranchRole::Live) => ActiveBranch::LiveSource,
                _ => ActiveBranch::FallbackSource,
            };
            pads.insert(branch, sink_pad);
        }

        let demand_connected = Arc::new(AtomicBool::new(true));
        let appsrc = match topology.live_source() {
            Some(stage) => {
                let appsrc = element_named(&elements, &stage.name)?
                    .clone()
                    .downcast::<gstreamer_app::AppSrc>()
                    .map_err(|_| anyhow!("stage '{}' is not an appsrc", stage.name))?;
                let connected = Arc::clone(&demand_connected);
                let need_data_events = events.clone();
                appsrc.set_callbacks(
                    gstreamer_app::AppSrcCallbacks::builder()
                        .need_data(move |_, _| {
                            if connected.load(Ordering::SeqCst) {
                                let _ = need_data_events.send(PipelineEvent::NeedData);
                            }
                        })
                        .build(),
                );
                Some(appsrc)
            }
            None => None,
        };

        let bus = pipeline
            .bus()
            .ok_or_else(|| anyhow!("pipeline has no bus"))?;
        bus.set_sync_handler(move |_, message| {
            if let Some(event) = bus_event(message) {
                let _ = events.send(event);
            }
            gstreamer::BusSyncReply::Drop
        });

        gstreamer::debug_bin_to_dot_file(&pipeline, gstreamer::DebugGraphDetails::all(), DOT_FILE_NAME);
        log::info!("gstreamer pipeline built: {}", topology.describe());

        Ok(Box::new(GstPipeline {
            pipeline,
            appsrc,
            switch,
            pads,
            demand_connected,
        }))
    }
}

fn element_named<'a>(
    elements: &'a HashMap<&str, gstreamer::Element>,
    name: &str,
) -> Result<&'a gstreamer::Element> {
    elements
        .get(name)
        .ok_or_else(|| anyhow!("no element for stage '{}'", name))
}

fn apply_property(
    element: &gstreamer::Element,
    stage: &str,
    name: &str,
    value: &PropValue,
) -> Result<()> {
    if element.find_property(name).is_none() {
        bail!("stage '{}' has no property '{}'", stage, name);
    }
    match value {
        PropValue::Caps(spec) => {
            let caps = gstreamer::Caps::from_str(&spec.to_string())
                .with_context(|| format!("parse caps '{}' for stage '{}'", spec, stage))?;
            element.set_property(name, &caps);
        }
        other => element.set_property_from_str(name, &other.to_string()),
    }
    Ok(())
}

fn bus_event(message: &gstreamer::Message) -> Option<PipelineEvent> {
    use gstreamer::MessageView;
    match message.view() {
        MessageView::Eos(..) => Some(PipelineEvent::EndOfStream),
        MessageView::Warning(warning) => Some(PipelineEvent::Warning {
            source: warning.src().map(|s| s.path_string().to_string()),
            message: describe_gerror(&warning.error(), warning.debug()),
        }),
        MessageView::Error(err) => Some(PipelineEvent::Error {
            source: err.src().map(|s| s.path_string().to_string()),
            message: describe_gerror(&err.error(), err.debug()),
        }),
        _ => None,
    }
}

fn describe_gerror(error: &gstreamer::glib::Error, debug: Option<gstreamer::glib::GString>) -> String {
    match debug {
        Some(debug) => format!("{} ({})", error, debug),
        None => error.to_string(),
    }
}

fn flow_error(err: gstreamer::FlowError) -> FlowError {
    match err {
        gstreamer::FlowError::NotLinked => FlowError::NotLinked,
        gstreamer::FlowError::Flushing => FlowError::Flushing,
        gstreamer::FlowError::Eos => FlowError::Eos,
        gstreamer::FlowError::NotNegotiated => FlowError::NotNegotiated,
        _ => FlowError::Error,
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

struct GstPipeline {
    pipeline: gstreamer::Pipeline,
    appsrc: Option<gstreamer_app::AppSrc>,
    switch: Option<gstreamer::Element>,
    pads: HashMap<ActiveBranch, gstreamer::Pad>,
    demand_connected: Arc<AtomicBool>,
}

impl MediaPipeline for GstPipeline {
    fn play(&self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set stream pipeline to Playing")?;
        Ok(())
    }

    fn halt(&self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("set stream pipeline to Null")?;
        Ok(())
    }

    fn push_buffer(&self, buffer: EncodedBuffer) -> FlowResult {
        let appsrc = self.appsrc.as_ref().ok_or(FlowError::NotLinked)?;
        let mut gst_buffer = gstreamer::Buffer::from_mut_slice(buffer.payload);
        if let Some(buffer_ref) = gst_buffer.get_mut() {
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(buffer.pts_ns));
        }
        appsrc.push_buffer(gst_buffer).map(|_| ()).map_err(flow_error)
    }

    fn end_of_stream(&self) -> FlowResult {
        let appsrc = self.appsrc.as_ref().ok_or(FlowError::NotLinked)?;
        appsrc.end_of_stream().map(|_| ()).map_err(flow_error)
    }

    fn select_input(&self, branch: ActiveBranch) -> Result<()> {
        let switch = self
            .switch
            .as_ref()
            .ok_or_else(|| anyhow!("pipeline has no input switch"))?;
        let pad = self
            .pads
            .get(&branch)
            .ok_or_else(|| anyhow!("input switch has no pad for {:?}", branch))?;
        switch.set_property("active-pad", pad);
        Ok(())
    }

    fn disconnect_demand(&self) {
        self.demand_connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}
