//! # Prithvi Engine
//!
//! Online seismic-event nucleation, association and refinement.
//!
//! The engine ingests a stream of single-station phase picks and maintains
//! a set of competing hypocentre hypotheses. Each pick is associated with
//! an existing origin when possible, otherwise offered to the grid
//! nucleator, and as a last resort to the XXL short-circuit for very large
//! events. Accepted origins run through the refinement loop (depth policy,
//! residual trimming, score enhancement), must survive the fake-origin
//! test, and are released downstream by the publication scheduler.
//!
//! ## Capabilities
//! Travel times and relocation are injected interfaces (`TravelTimeTable`,
//! `Relocator`). The crate bundles a coarse 1-D table (`StandardTable`) and
//! a damped least-squares locator (`LeastSquaresRelocator`) so the engine
//! is self-contained for playback and testing; production deployments may
//! substitute their own implementations.
//!
//! ## Concurrency model
//! Single-threaded, cooperatively driven: one `feed_pick`/`feed_origin`
//! call runs to completion, and the origin set evolves deterministically
//! for a given input order.

pub mod assoc;
pub mod earthmodel;
pub mod engine;
pub mod error;
mod fake;
pub mod locate;
mod merge;
pub mod nucleate;
pub mod picklog;
mod refine;
pub mod score;
pub mod travel;
mod xxl;

pub use assoc::{Association, Associator};
pub use earthmodel::StandardTable;
pub use engine::{Locator, ReportSink};
pub use error::EngineError;
pub use locate::{LeastSquaresRelocator, LocateError, Relocator};
pub use nucleate::{GridCell, GridNucleator};
pub use picklog::PickLog;
pub use score::{affinity, arrival_score, origin_score, update_score};
pub use travel::{first_p, phase_entry, TravelTime, TravelTimeError, TravelTimeTable};
