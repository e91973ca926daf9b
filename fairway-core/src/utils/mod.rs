pub mod quorum;
pub mod validation;
