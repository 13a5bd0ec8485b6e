//! Scheduled maintenance jobs (spec §4.I, §4.J): retention deletion and
//! the columnar extract.

pub mod extract;
pub mod retention;
