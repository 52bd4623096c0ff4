//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Cycle orchestrator, topology sources, and delivery sinks for the grid simulator.

pub mod orchestrator;
pub mod outbound;
pub mod persist;
pub mod publish;
pub mod schedule;
pub mod sink;
pub mod state;
pub mod topology;

pub use orchestrator::{
    CycleReport, OrchestratorHandle, SimulatorOrchestrator, SimulatorSinks, StatusHandle,
    StopSignal, TelemetryDelivery,
};
pub use outbound::{FlushReport, OutboundDispatcher, RestFieldDevice};
pub use persist::{PersistPublishSink, SharedTelemetryCache};
pub use publish::{PublishedEvent, TelemetryBroadcaster};
pub use sink::{AlarmSink, FieldDeviceAlarmSink, FieldDeviceApi, SinkError, TelemetrySink};
pub use state::{RunPhase, RunState, RunStateCell};
pub use topology::{FileTopology, StaticTopology, TopologyError, TopologySource};
