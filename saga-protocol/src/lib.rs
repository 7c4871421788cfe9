//! Wire types shared by the saga contract and the bard inference daemon.
//!
//! Three surfaces live here:
//!
//! - **Daemon protocol**: the JSON requests and replies exchanged over the
//!   daemon's local TCP socket ([`daemon`]).
//! - **Jury votes**: the NPL broadcast message one node emits per validated
//!   request ([`vote`]).
//! - **State blocks**: the marker-delimited player-state format the game
//!   daemon emits and the contract persists ([`state`]).

pub mod daemon;
pub mod state;
pub mod vote;

pub use daemon::{DaemonRequest, DaemonStatus, ModelPhase, Verdict};
pub use state::{GameStatus, BEGIN_STATE_MARKER, END_STATE_MARKER, REQUIRED_HEADERS};
pub use vote::Vote;
