//! Content generation: request model, prompt, normalization and the service
//! that ties them together.

pub mod generator;
pub mod model;
pub mod normalizer;
pub mod prompt;

pub use generator::{GeneratedContent, GenerationService};
pub use model::{ContentBundle, GenerateRequest, PostIdea};
pub use normalizer::{NormalizedResponse, ResponseSource, normalize_response, parse};
