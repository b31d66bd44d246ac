//! # Zone Handoff Client Library
//!
//! Client side of the zone handoff workspace. A client is attached to one
//! zone server at a time and has to follow its player across zone
//! boundaries without flapping between servers.
//!
//! ## Module Organization
//!
//! ### Transition (`transition`)
//! The `ClientTransitionController` state machine: hysteresis, debounce,
//! minimum spacing between commits, cooldown after bursts and forced
//! transitions after a prolonged zone mismatch.
//!
//! ### Backoff (`backoff`)
//! Exponential reconnect delays with a cap and an attempt budget.
//!
//! ### Health (`health`)
//! Mismatch counting, stuck commits, position jumps and a rolling success
//! rate, reported as `Anomaly` values.
//!
//! ### Timers (`timers`)
//! Background timers that a `TransitionScope` pauses during a commit and
//! resumes exactly once afterwards.
//!
//! ### Network (`network`)
//! `ClientSession`, which ties the pieces above to a live UDP link.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::{ClientConfig, ClientSession};
//! use shared::Vec2;
//!
//! # async fn demo() -> Result<(), client::SessionError> {
//! let config = ClientConfig::default().validate()?;
//! let mut session = ClientSession::connect(config).await?;
//! session.set_velocity(Vec2::new(50.0, 0.0));
//! session
//!     .run_until(tokio::time::sleep(std::time::Duration::from_secs(10)))
//!     .await?;
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod health;
pub mod network;
pub mod timers;
pub mod transition;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use config::ClientConfig;
pub use error::SessionError;
pub use health::{Anomaly, HealthConfig, HealthMonitor};
pub use network::{ClientSession, ServerLink, SessionStats};
pub use timers::{TimerGroup, TransitionScope};
pub use transition::{ClientTransitionController, Decision, TransitionConfig, TransitionState};
