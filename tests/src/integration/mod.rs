//! Integration flows, grouped by the surface they drive.

pub mod dispatch_flows;
pub mod launcher_flows;
pub mod recovery;
