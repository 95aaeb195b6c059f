//! Greenroom Engine
//!
//! Pre-flight negotiation for camera and microphone capture, the channel
//! status model that folds results into a go/no-go verdict, and the
//! session orchestration around them. Platform backends plug in through
//! the [`acquisition::DeviceAcquisition`] trait; a scripted backend for
//! tests and demos lives in [`sim`].
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------+
//! |                   PreflightSession                   |
//! |                                                      |
//! |  ReachabilityCheck   Negotiator       AudioLevelMeter|
//! |   (TCP probe)         (attempt ladder) (watch feed)  |
//! |         \                 |               /          |
//! |          +------------ StatusFeed -------+           |
//! +--------------------------|---------------------------+
//!                            | CheckEvent / UserIntent
//!                    presentation adapter
//!                   (CLI, shell, test rig)
//! ```

pub mod acquisition;
pub mod events;
pub mod ladder;
pub mod meter;
pub mod negotiate;
pub mod reachability;
pub mod session;
pub mod sim;
pub mod status;
pub mod track;

pub use session::*;
