//! AI Secretary: an LLM chat loop with tools, voice and email agents, served over HTTP.

pub mod agents;
pub mod assistant;
pub mod config;
pub mod context;
pub mod error;
pub mod integrations;
pub mod llm;
pub mod logging;
pub mod persona;
pub mod prompts;
pub mod tools;
pub mod web;

#[cfg(test)]
mod testing;
