pub mod article;
pub mod cluster;
pub mod event;
pub mod feed;
pub mod monitor;
pub mod score;
pub mod user;

pub use article::{normalize_url, CleanedArticle, RawArticle};
pub use cluster::EventCluster;
pub use event::{DetectedEvent, EventType, ImpactLabel};
pub use feed::{FeedTheme, PipelineDiagnostics};
pub use monitor::{AlertKind, AlertLog, DigestItem, NewsItemRecord, PricePoint, SocialMention};
pub use score::{ScoreBreakdown, UserEventScore};
pub use user::{AppUser, Frequency, Holding, HoldingRef, Mode, Sensitivity, UserSettings};
