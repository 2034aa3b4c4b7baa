//! Round clock and subround scheduler.
//!
//! A round is a fixed slice of wall-clock time divided into subrounds
//! (StartRound, Block, Signature, EndRound), each owning a fraction of the
//! round window. The [`Chronology`] runs a single cooperative task that
//! drives the registered [`SubroundHandler`]s through their windows; all
//! consensus state mutation happens on that task.

mod chronology;
mod round;
mod subround;

pub use chronology::{Chronology, ChronologyConfig, ChronologyError, RoundOutcome, TransitionHook};
pub use round::{ManualRounder, Rounder, WallClockRounder};
pub use subround::{standard_subrounds, SubroundHandler, SubroundId, SubroundSpec, SubroundStatus};
