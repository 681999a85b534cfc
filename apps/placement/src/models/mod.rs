pub mod jd;
pub mod mapping;
pub mod profile;
pub mod resume;
pub mod score;
