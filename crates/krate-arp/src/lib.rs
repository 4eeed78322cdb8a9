//! krate-arp: Sample-accurate arpeggiator step engine
//!
//! A note-event scheduler driven by six polymetric per-step lanes
//! (velocity, gate, pitch, modifier, ratchet, condition) through a
//! three-layer gating pipeline: Euclidean structure, per-step trig
//! conditions, then articulation modifiers and ratcheting. Events carry
//! per-block sample offsets; the engine allocates nothing on the audio
//! path after `prepare()`.
//!
//! ## Modules
//! - `held` - Held-note buffer
//! - `selector` - Note selection modes
//! - `euclid` - Euclidean rhythm gate (Bjorklund, 32-bit mask)
//! - `condition` - The 18 trig conditions
//! - `modifier` - Step modifier bitmask and articulation priority
//! - `engine` - The step engine itself
//! - `state` - Binary state persistence with legacy-preset tolerance
//! - `controls` - Lock-free normalized control surface

pub mod condition;
pub mod controls;
pub mod engine;
pub mod euclid;
pub mod held;
pub mod modifier;
pub mod selector;
pub mod state;

pub use condition::{CONDITION_COUNT, TrigCondition};
pub use controls::{ArpControls, LaneControls};
pub use engine::{Arpeggiator, DEFAULT_LANE_LENGTH, StepRate};
pub use euclid::EuclidGate;
pub use held::{HeldNote, HeldNotes};
pub use modifier::{Articulation, articulation, step_flags};
pub use selector::{ArpMode, NoteSelector, Selection};
