//! Outgoing query rewriting.
//!
//! Rewrites the parameters object (`data[1]`) of `perplexity_ask` envelopes
//! so the host sends what the query box selectors show.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::messenger::{Interceptor, InterceptorHandle, Messenger, Verdict};
use crate::protocol::{Envelope, MessageData, parse_structured_message};

use super::context::{
    CacheKey, PolicyContext, QueryBoxSnapshot, QueryCache, Settings, get_typed,
};
use super::schema::{SpaceFiles, ThreadMessage};

// ============================================================================
// Constants
// ============================================================================

/// Event name of an outgoing query.
pub const ASK_EVENT: &str = "perplexity_ask";

/// Query source the rewriting never touches.
const DEFAULT_SEARCH: &str = "default_search";

/// Window of [`alter_next_query`].
const NEXT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const WRITING: &str = "writing";
const INTERNET: &str = "internet";

// ============================================================================
// QuerySource
// ============================================================================

/// Where a query was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Home,
    Modal,
    Collection,
    Followup,
    Edit,
    Retry,
}

impl QuerySource {
    /// Parses the `query_source` parameter.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "home" => Some(Self::Home),
            "modal" => Some(Self::Modal),
            "collection" => Some(Self::Collection),
            "followup" => Some(Self::Followup),
            "edit" => Some(Self::Edit),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Modal => "modal",
            Self::Collection => "collection",
            Self::Followup => "followup",
            Self::Edit => "edit",
            Self::Retry => "retry",
        }
    }

    /// Returns `true` for sources that start a new thread.
    #[must_use]
    pub const fn starts_thread(self) -> bool {
        matches!(self, Self::Home | Self::Modal | Self::Collection)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns the ask parameters if `envelope` is an ask the rewriting may touch.
fn ask_params(envelope: &Envelope) -> Option<&Map<String, Value>> {
    if !envelope.is_event(ASK_EVENT) {
        return None;
    }
    let params = envelope.object_at(1)?;
    let default_search = params
        .get("query_source")
        .is_some_and(|source| source == DEFAULT_SEARCH);
    (!default_search).then_some(params)
}

/// Returns a copy of `envelope` with new ask parameters.
fn with_params(envelope: &Envelope, params: Map<String, Value>) -> Envelope {
    let mut data = envelope.data.clone();
    data[1] = Value::Object(params);
    Envelope {
        message_code: envelope.message_code,
        event: envelope.event.clone(),
        data,
    }
}

/// Sets `key` to `value`, or removes it when there is no value.
fn set_or_remove(params: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            params.insert(key.to_string(), value);
        }
        None => {
            params.remove(key);
        }
    }
}

/// Deduplicates keeping first occurrences. Empty becomes `null`.
fn finish_sources(sources: Vec<String>) -> Value {
    let mut unique: Vec<String> = Vec::with_capacity(sources.len());
    for source in sources {
        if !unique.contains(&source) {
            unique.push(source);
        }
    }

    if unique.is_empty() {
        Value::Null
    } else {
        Value::Array(unique.into_iter().map(Value::String).collect())
    }
}

fn push(sources: &mut Vec<String>, source: &str) {
    sources.push(source.to_string());
}

fn space_has_files(cache: &dyn QueryCache, space_uuid: &str) -> bool {
    get_typed::<SpaceFiles>(cache, &CacheKey::space_files(space_uuid))
        .is_some_and(|files| files.has_files())
}

// ============================================================================
// rewrite_ask
// ============================================================================

/// Applies the query box state to an outgoing ask.
///
/// Returns `None` when the envelope is not an ask this policy rewrites:
/// another event, a `default_search` query, an ask marked
/// `ignore_interceptor`, or an unknown query source.
#[must_use]
pub fn rewrite_ask(
    envelope: &Envelope,
    settings: &Settings,
    query_box: &QueryBoxSnapshot,
    cache: &dyn QueryCache,
) -> Option<Envelope> {
    let params = ask_params(envelope)?;

    if params.get("ignore_interceptor") == Some(&Value::Bool(true)) {
        return None;
    }

    let source = QuerySource::parse(params.get("query_source")?.as_str()?)?;
    let selectors = settings.query_box_selectors;
    let selected_space = query_box
        .selected_space_uuid
        .as_deref()
        .filter(|uuid| !uuid.is_empty());

    let model = if selectors.language_model && source != QuerySource::Retry {
        Some(Value::String(query_box.selected_language_model.clone()))
    } else {
        params.get("model_preference").cloned()
    };

    let mut sources: Vec<String> = params
        .get("sources")
        .and_then(Value::as_array)
        .map(|sources| {
            sources
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut params = params.clone();

    if source.starts_thread() {
        let mut focus = if selectors.space_n_focus {
            Some(query_box.focus_mode.clone())
        } else {
            params
                .get("search_focus")
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let is_writing = |focus: &Option<String>| focus.as_deref() == Some(WRITING);

        if source == QuerySource::Collection
            && !matches!(focus.as_deref(), Some(WRITING | INTERNET))
        {
            focus = Some(INTERNET.to_string());
        }

        if query_box.main.include_org_files {
            push(&mut sources, "org");
            sources.retain(|source| source != "space");

            if is_writing(&focus) {
                focus = Some(INTERNET.to_string());
            } else {
                push(&mut sources, "web");
            }
        }

        if let Some(space) = selected_space
            && query_box.main.include_space_files
            && space_has_files(cache, space)
        {
            push(&mut sources, "space");

            if is_writing(&focus) {
                focus = Some(INTERNET.to_string());
                sources.retain(|source| source != "web");
            } else {
                push(&mut sources, "web");
            }
        }

        let query_source = if selected_space.is_some() {
            QuerySource::Collection.as_str()
        } else {
            source.as_str()
        };
        let target = match selected_space {
            Some(space) if selectors.space_n_focus => Some(Value::String(space.to_string())),
            _ => params.get("target_collection_uuid").cloned(),
        };

        set_or_remove(&mut params, "model_preference", model);
        set_or_remove(&mut params, "search_focus", focus.map(Value::String));
        params.insert("query_source".to_string(), Value::from(query_source));
        set_or_remove(&mut params, "target_collection_uuid", target);
        params.insert("sources".to_string(), finish_sources(sources));
    } else {
        let mut query_source = source;
        let mut target = params.get("target_collection_uuid").cloned();

        if query_box.follow_up.include_org_files {
            push(&mut sources, "org");
        }

        let thread_space = get_typed::<Vec<ThreadMessage>>(
            cache,
            &CacheKey::thread_info(&query_box.thread_slug),
        )
        .and_then(|messages| messages.into_iter().next())
        .and_then(|first| first.collection_info)
        .map(|info| info.uuid);

        if let Some(space) = thread_space
            && query_box.follow_up.include_space_files
            && space_has_files(cache, &space)
        {
            push(&mut sources, "space");
            target = Some(Value::String(space));

            if query_source == QuerySource::Retry {
                query_source = QuerySource::Edit;
            }
        }

        set_or_remove(&mut params, "model_preference", model);
        params.insert("query_source".to_string(), Value::from(query_source.as_str()));
        set_or_remove(&mut params, "target_collection_uuid", target);
        params.insert("sources".to_string(), finish_sources(sources));
    }

    Some(with_params(envelope, params))
}

// ============================================================================
// override_ask
// ============================================================================

/// Replaces the model of the next ask and optionally turns on pro search.
///
/// Without a model, `model_preference` is removed. Returns `None` for
/// envelopes that are not asks or are `default_search` queries.
#[must_use]
pub fn override_ask(envelope: &Envelope, model: Option<&str>, pro_search: bool) -> Option<Envelope> {
    let mut params = ask_params(envelope)?.clone();

    set_or_remove(&mut params, "model_preference", model.map(Value::from));
    if pro_search {
        params.insert("mode".to_string(), Value::from("copilot"));
    }

    Some(with_params(envelope, params))
}

// ============================================================================
// Policies
// ============================================================================

/// Registers the persistent query rewriting policy.
pub fn alter_queries(messenger: &Messenger, context: &PolicyContext) -> InterceptorHandle {
    let context = context.clone();

    messenger.add_interceptor(Interceptor::new(
        move |message: &MessageData| {
            parse_structured_message(message)
                .and_then(|envelope| {
                    rewrite_ask(
                        &envelope,
                        &context.settings.settings(),
                        &context.query_box.snapshot(),
                        context.cache.as_ref(),
                    )
                })
                .into()
        },
        |message: MessageData, rewritten: Envelope| async move {
            debug!("Outgoing query rewritten");
            Ok(Verdict::Forward(message.with_envelope(&rewritten)))
        },
    ))
}

/// Registers a one-shot override for the next outgoing ask.
///
/// The override claims the ask, so later interceptors do not see it. It
/// removes itself after the first ask or after 5 seconds without one.
pub fn alter_next_query(
    messenger: &Messenger,
    model: Option<String>,
    pro_search: bool,
) -> InterceptorHandle {
    let matches = move |message: &MessageData| {
        parse_structured_message(message)
            .and_then(|envelope| override_ask(&envelope, model.as_deref(), pro_search))
    };
    let stop_matches = matches.clone();

    messenger.add_interceptor(
        Interceptor::new(
            move |message: &MessageData| matches(message).into(),
            |message: MessageData, overridden: Envelope| async move {
                debug!("Next query overridden");
                Ok(Verdict::Forward(message.with_envelope(&overridden)))
            },
        )
        .stop_when(move |message| stop_matches(message).is_some())
        .with_timeout(NEXT_QUERY_TIMEOUT)
        .stop_propagation(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::policy::context::{FileInclusion, MemoryCache, QueryBoxSelectors};
    use crate::protocol::parse_envelope;

    fn ask(params: Value) -> Envelope {
        Envelope::event(42, ASK_EVENT, vec![json!("what is rust?"), params])
    }

    fn params_of(envelope: &Envelope) -> &Map<String, Value> {
        envelope.object_at(1).expect("params")
    }

    fn settings(language_model: bool, space_n_focus: bool) -> Settings {
        Settings {
            query_box_selectors: QueryBoxSelectors {
                language_model,
                space_n_focus,
            },
            ..Settings::default()
        }
    }

    fn query_box() -> QueryBoxSnapshot {
        QueryBoxSnapshot {
            selected_language_model: "claude2".to_string(),
            focus_mode: "internet".to_string(),
            ..QueryBoxSnapshot::default()
        }
    }

    #[test]
    fn test_non_matching_asks() {
        let cache = MemoryCache::new();
        let settings = settings(true, true);
        let query_box = query_box();

        for params in [
            json!({"query_source": "default_search"}),
            json!({"query_source": "home", "ignore_interceptor": true}),
            json!({"query_source": "somewhere"}),
            json!({}),
        ] {
            assert!(rewrite_ask(&ask(params), &settings, &query_box, &cache).is_none());
        }

        let other = Envelope::event(42, "analytics_event", vec![json!({}), json!({})]);
        assert!(rewrite_ask(&other, &settings, &query_box, &cache).is_none());
    }

    #[test]
    fn test_home_with_org_files() {
        let cache = MemoryCache::new();
        let query_box = QueryBoxSnapshot {
            main: FileInclusion {
                include_org_files: true,
                include_space_files: false,
            },
            ..query_box()
        };

        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "home", "sources": ["space"], "search_focus": "internet"})),
            &settings(false, false),
            &query_box,
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["sources"], json!(["org", "web"]));
        assert_eq!(params["query_source"], "home");
        assert_eq!(params["search_focus"], "internet");
    }

    #[test]
    fn test_writing_focus_with_org_files_becomes_internet() {
        let cache = MemoryCache::new();
        let query_box = QueryBoxSnapshot {
            focus_mode: "writing".to_string(),
            main: FileInclusion {
                include_org_files: true,
                include_space_files: false,
            },
            ..query_box()
        };

        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "modal"})),
            &settings(false, true),
            &query_box,
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["sources"], json!(["org"]));
        assert_eq!(params["search_focus"], "internet");
    }

    #[test]
    fn test_selected_space_with_files() {
        let cache = MemoryCache::new();
        cache.set(CacheKey::space_files("s-1"), json!({"files": [{"name": "a.pdf"}]}));

        let query_box = QueryBoxSnapshot {
            selected_space_uuid: Some("s-1".to_string()),
            focus_mode: "academic".to_string(),
            main: FileInclusion {
                include_org_files: false,
                include_space_files: true,
            },
            ..query_box()
        };

        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "home", "model_preference": "turbo"})),
            &settings(true, true),
            &query_box,
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["sources"], json!(["space", "web"]));
        assert_eq!(params["query_source"], "collection");
        assert_eq!(params["target_collection_uuid"], "s-1");
        assert_eq!(params["model_preference"], "claude2");
        assert_eq!(params["search_focus"], "academic");
    }

    #[test]
    fn test_collection_source_forces_internet_focus() {
        let cache = MemoryCache::new();
        let query_box = QueryBoxSnapshot {
            focus_mode: "youtube".to_string(),
            ..query_box()
        };

        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "collection", "sources": []})),
            &settings(false, true),
            &query_box,
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["search_focus"], "internet");
        assert_eq!(params["sources"], Value::Null);
    }

    #[test]
    fn test_retry_in_space_thread_becomes_edit() {
        let cache = MemoryCache::new();
        cache.set(
            CacheKey::thread_info("my-thread"),
            json!([{"collection_info": {"uuid": "c-9"}}]),
        );
        cache.set(CacheKey::space_files("c-9"), json!({"files": [1]}));

        let query_box = QueryBoxSnapshot {
            thread_slug: "my-thread".to_string(),
            follow_up: FileInclusion {
                include_org_files: true,
                include_space_files: true,
            },
            ..query_box()
        };

        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "retry", "model_preference": "turbo", "search_focus": "x"})),
            &settings(true, true),
            &query_box,
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["sources"], json!(["org", "space"]));
        assert_eq!(params["query_source"], "edit");
        assert_eq!(params["target_collection_uuid"], "c-9");
        // Retries keep their model and focus.
        assert_eq!(params["model_preference"], "turbo");
        assert_eq!(params["search_focus"], "x");
    }

    #[test]
    fn test_followup_without_space_keeps_target() {
        let cache = MemoryCache::new();
        let rewritten = rewrite_ask(
            &ask(json!({"query_source": "followup", "target_collection_uuid": "t-1"})),
            &settings(false, false),
            &query_box(),
            &cache,
        )
        .expect("rewritten");
        let params = params_of(&rewritten);

        assert_eq!(params["target_collection_uuid"], "t-1");
        assert_eq!(params["sources"], Value::Null);
        assert!(!params.contains_key("model_preference"));
    }

    #[test]
    fn test_override_ask() {
        let envelope = ask(json!({"query_source": "home", "model_preference": "turbo", "mode": "concise"}));

        let overridden = override_ask(&envelope, Some("gpt4o"), true).expect("overridden");
        assert_eq!(params_of(&overridden)["model_preference"], "gpt4o");
        assert_eq!(params_of(&overridden)["mode"], "copilot");

        let cleared = override_ask(&envelope, None, false).expect("overridden");
        assert!(!params_of(&cleared).contains_key("model_preference"));
        assert_eq!(params_of(&cleared)["mode"], "concise");

        assert!(override_ask(&ask(json!({"query_source": "default_search"})), None, true).is_none());
    }

    #[tokio::test]
    async fn test_alter_next_query_is_one_shot_and_claims() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        use crate::messenger::MatchOutcome;
        use crate::transport::Channel;

        let (ours, _theirs) = Channel::pair();
        let messenger = Messenger::new(ours);

        let handle = alter_next_query(&messenger, Some("gpt4o".to_string()), false);
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later_calls);
        messenger.add_interceptor(Interceptor::new(
            |_: &MessageData| MatchOutcome::from_bool(true),
            move |message: MessageData, ()| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Verdict::Forward(message)) }
            },
        ));

        let frame = crate::protocol::stringify(&ask(json!({"query_source": "home"})));
        let survived = messenger
            .intercept(MessageData::web_socket("send", frame.clone()))
            .await
            .expect("forwarded");

        let envelope = parse_envelope(survived.frame_text().expect("frame")).expect("envelope");
        assert_eq!(params_of(&envelope)["model_preference"], "gpt4o");
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert!(!handle.is_active());

        let second = messenger
            .intercept(MessageData::web_socket("send", frame))
            .await
            .expect("forwarded");
        let envelope = parse_envelope(second.frame_text().expect("frame")).expect("envelope");
        assert!(!params_of(&envelope).contains_key("model_preference"));
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    }
}
