pub mod assessment_dto;
pub mod attempt_dto;
