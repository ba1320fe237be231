pub mod bootstrap;
pub mod dual_track;
pub mod helpers;
pub mod pipeline;
pub mod pod_distribution;
pub mod preflight;
pub mod quota;
pub mod rhmi;
pub mod topology;
pub mod uninstall;
pub mod watches;
