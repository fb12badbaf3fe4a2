pub mod assessment_service;
pub mod attempt_service;
pub mod grading_service;
pub mod scoring_service;
pub mod security_service;
pub mod timing_service;
