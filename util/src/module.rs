//! Module interfaces
//!
//! Every cyclically-processed module in the navigation software presents the
//! same face: it is initialised once against a [`Session`] (loading its
//! parameter file, opening its archives), then driven by repeated `proc`
//! calls from the main loop. Modules never block and never talk to each
//! other directly; all data flows through their input and output types.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// The state of a cyclically-processed module.
pub trait State {
    /// Data handed to the module at initialisation, typically the name of
    /// its parameter file.
    type InitData;
    /// An error which can occur during initialisation.
    type InitError;

    /// Data consumed by one processing cycle.
    type InputData;
    /// Data produced by one processing cycle.
    type OutputData;
    /// Status of the module after a cycle, suitable for archiving.
    type StatusReport;
    /// An error which can occur during cyclic processing.
    type ProcError;

    /// Initialise the module within the given session.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>;

    /// Run one processing cycle, producing the cycle's output and a status
    /// report on how it went.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}
