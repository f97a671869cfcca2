//! 数据模型模块

pub mod audit;
pub mod debt;
pub mod movement;
