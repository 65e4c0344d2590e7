//! 📇 The sink registry -- a phone book from type names to constructors.
//!
//! The config says `type = "elasticsearch"`. Somebody has to turn that string
//! into an actual sink. That somebody is this map. New sink kinds register
//! themselves here and the coordinator never has to learn their names.
//!
//! Lookups are case-insensitive and ignore stray whitespace, because someone
//! WILL write `type = "Elasticsearch "` in production, and it WILL be a Friday.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::sinks::{ElasticsearchSink, FileSink, HttpSink, Sink, StdoutSink};

/// 🏭 Builds a fresh, unconfigured sink. `configure` comes next.
pub type SinkConstructor = Arc<dyn Fn() -> Box<dyn Sink> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SinkRegistry {
    constructors: BTreeMap<String, SinkConstructor>,
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

fn normalize(type_name: &str) -> String {
    type_name.trim().to_ascii_lowercase()
}

impl SinkRegistry {
    /// 📭 An empty phone book. Useful for tests that want full control.
    pub fn empty() -> Self {
        Self::default()
    }

    /// 📚 Every sink this crate ships with.
    pub fn with_builtin_sinks() -> Self {
        let mut registry = Self::empty();
        registry.register("stdout", || Box::new(StdoutSink::new()) as Box<dyn Sink>);
        registry.register("file", || Box::new(FileSink::new()) as Box<dyn Sink>);
        registry.register("elasticsearch", || {
            Box::new(ElasticsearchSink::new()) as Box<dyn Sink>
        });
        registry.register("http", || Box::new(HttpSink::new()) as Box<dyn Sink>);
        registry
    }

    /// ➕ Add (or replace) a sink type.
    pub fn register<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        self.constructors
            .insert(normalize(type_name), Arc::new(constructor));
    }

    /// 🔎 Find the constructor for a type, or `None` if nobody registered it.
    /// Turning that `None` into a startup error is the caller's job, since only
    /// the caller knows which pump asked.
    pub fn resolve(&self, type_name: &str) -> Option<SinkConstructor> {
        self.constructors.get(&normalize(type_name)).cloned()
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}
