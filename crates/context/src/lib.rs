//! CiteForge Context Engine
//!
//! Turns a fused ranking into a grounded, citation-traceable answer:
//! - Context packing with numbered markers
//! - Citation filtering against the turn's citation index
//! - Streaming generation with timeouts and cancellation
//! - An evaluation harness over the whole turn pipeline

pub mod bootstrap;
pub mod citations;
pub mod evals;
pub mod generator;
pub mod packer;
pub mod pipeline;
pub mod prompts;

pub use bootstrap::Components;
pub use citations::CitationFilter;
pub use generator::{create_generator, FragmentStream, Generator, Script, ScriptedGenerator};
pub use packer::{CitationIndex, ContextPack, ContextPacker, ContextPackerConfig, PackEntry};
pub use pipeline::{Evidence, RagPipeline, TurnOutcome};
