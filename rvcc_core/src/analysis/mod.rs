//! Analyses: CFG, dominator tree + frontiers, loop info, and the analysis cache
//! that mediates access to them (spec §4.2, §5, §9).

pub mod cache;
pub mod cfg;
pub mod dom_solver;
pub mod dominators;
pub mod loop_info;

pub use cache::AnalysisCache;
pub use cfg::Cfg;
pub use dominators::Dominators;
pub use loop_info::LoopInfo;
