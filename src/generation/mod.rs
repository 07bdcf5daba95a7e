pub mod client;
pub mod model;
pub mod normalizer;
pub mod prompts;
pub mod reply;
pub mod request;
pub mod video;

pub use client::GenerationClient;
pub use model::{Character, ComicData, ComicPanel, Scene, Shot, StoryboardData};
pub use normalizer::extract_image_artifact;
pub use reply::parse_json_reply;
pub use request::{AnalyzeOptions, CharacterReference, ImageRequest, ShotCount, StoryMode, VideoRequest};
pub use video::{GenerationJob, JobStatus, VideoFamily};
