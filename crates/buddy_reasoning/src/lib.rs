pub mod api_types;
pub mod classifier;
pub mod companion;
pub mod ingest;
pub mod llm;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod summary;

pub use classifier::EmotionClassifier;
pub use companion::{clean_for_speech, CompanionResponder, TracingSpeechSink};
pub use ingest::{IngestReply, IngestionPipeline};
pub use llm::{CompletionParams, LlmClient};
pub use providers::create_client;
pub use summary::{parse_summary_response, DailySummarizer, DayReport, DayStatus, SummaryOutcome};
