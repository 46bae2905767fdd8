// ------------------------------------------------------------------
//  On-disk content-addressed caches (C2 TTS artifact cache, C3 silence
//  map cache)
// ------------------------------------------------------------------

pub mod silence_cache;
pub mod tts_cache;

pub use silence_cache::SilenceCache;
pub use tts_cache::{TtsCache, TtsCacheKey};
