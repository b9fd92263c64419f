//! **cardiac-inverse**: material laws, misfit targets and a reduced-functional
//! driver for estimating myocardial parameters from clinical measurements.
//!
//! The mechanics solve and its adjoint are external; this crate implements
//! the pieces around them:
//!
//! 1. **Kinematics** (`kinematics`): strain invariants and active-strain corrections.
//! 2. **Material** (`material`): Holzapfel–Ogden, neo-Hookean and Guccione laws.
//! 3. **Controls** (`control`): scalar, nodal and regional control fields.
//! 4. **Targets** (`targets`, `projection`): volume, regional strain, full strain
//!    and displacement misfits.
//! 5. **Regularization** (`regularization`) and the total functional (`functional`).
//! 6. **Driver** (`optimizer`, `tape`): reduced functional + L-BFGS via `argmin`.
//! 7. **Data** (`measurements`, `store`, `config`): phase selection, results
//!    persistence and settings.

pub mod types;
pub mod kinematics;
pub mod material;
pub mod control;
pub mod projection;
pub mod targets;
pub mod regularization;
pub mod functional;
pub mod measurements;
pub mod tape;
pub mod optimizer;
pub mod store;
pub mod config;
