pub mod booster;
pub mod commands;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod features;
pub mod final_training;
pub mod gain;
pub mod labels;
pub mod logging;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod tpe;
pub mod trainer;
pub mod trial_log;
