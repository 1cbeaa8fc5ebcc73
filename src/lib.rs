//! Dualsub - Bilingual Subtitle Pipeline
//! 
//! Turns an uploaded video into bilingual subtitles through an AI
//! transcription/translation service, parks every job at a human review
//! checkpoint, then renders soft-subtitle and burned-in videos with ffmpeg.

pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod render;
pub mod subtitle;
pub mod transcribe;
