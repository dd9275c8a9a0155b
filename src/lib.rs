//! Article Distributor library.
//!
//! Spreads generated articles across a fleet of CMS sites according to each
//! site's demand credit, and keeps their comment sections alive with generated
//! comments from synthetic personas.

pub mod ai;
pub mod cms;
pub mod comment;
pub mod config;
pub mod constants;
pub mod db;
pub mod pool;
pub mod publish;
pub mod scheduling;
