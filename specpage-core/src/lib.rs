pub mod builder;
pub mod cancel;
pub mod config;
pub mod document;
pub mod event;
pub mod markdown;
pub mod parser;
pub mod renderer;
pub mod scanner;
pub mod template;
pub mod validator;

// Re-export main types
pub use builder::{
    BuildError, BuildReport, Converter, ConverterBuilder, DocumentFailure, INDEX_FILE,
};
pub use cancel::CancellationToken;
pub use config::{ServerConfig, ServerMode, SiteConfig};
pub use document::{DocId, DocumentError, SpecDocument};
pub use event::{ChannelSink, Event, EventKind, EventSink, Fanout, MemorySink, TracingSink};
pub use parser::{ParseCause, ParseError, RawTree, parse};
pub use renderer::{RenderedPage, render};
pub use scanner::{ChangeKind, SourceChange, SourceFilter};
pub use template::{PageTemplate, TemplateError};
pub use validator::{ValidationResult, Warning, WarningKind, validate};
