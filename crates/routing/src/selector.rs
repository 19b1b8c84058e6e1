//! Channel selectors
//!
//! A selector decides, per event, which queues must accept it (required)
//! and which may accept it on a best-effort basis (optional). All queue
//! lists are resolved when the selector is built; `route()` only borrows.

use std::collections::{BTreeSet, HashMap};

use conduit_protocol::Event;

use crate::QueueId;
use crate::error::{Result, RoutingError};

/// Queues an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routes<'a> {
    /// Every one of these must accept the event, or none do
    pub required: &'a [QueueId],
    /// Failures here are tolerated
    pub optional: &'a [QueueId],
}

impl Routes<'_> {
    /// Whether the event goes nowhere
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

/// Routing strategy, fixed at configuration time
#[derive(Debug, Clone)]
pub enum ChannelSelector {
    /// Every event to every queue
    Replicating(ReplicatingSelector),
    /// Queues chosen by the value of one header
    Multiplexing(MultiplexingSelector),
}

impl ChannelSelector {
    /// Route one event
    #[inline]
    pub fn route(&self, event: &Event) -> Routes<'_> {
        match self {
            Self::Replicating(selector) => selector.route(),
            Self::Multiplexing(selector) => selector.route(event),
        }
    }

    /// Strategy name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Replicating(_) => "replicating",
            Self::Multiplexing(_) => "multiplexing",
        }
    }

    /// Every queue this selector can route to, ascending
    pub fn queues(&self) -> Vec<QueueId> {
        let mut all = BTreeSet::new();
        match self {
            Self::Replicating(s) => {
                all.extend(&s.required);
                all.extend(&s.optional);
            }
            Self::Multiplexing(s) => {
                for route in s.mappings.values().chain([&s.fallback]) {
                    all.extend(&route.required);
                    all.extend(&route.optional);
                }
            }
        }
        all.into_iter().collect()
    }
}

/// Sends every event to all configured queues
#[derive(Debug, Clone)]
pub struct ReplicatingSelector {
    required: Vec<QueueId>,
    optional: Vec<QueueId>,
}

impl ReplicatingSelector {
    /// Build from all queues plus the subset that is optional
    ///
    /// Optional queues are moved out of the required set.
    pub fn new(queues: Vec<QueueId>, optional: &[QueueId]) -> Self {
        let mut optional_set = Vec::new();
        for id in optional {
            push_unique(&mut optional_set, *id);
        }

        let mut required = Vec::with_capacity(queues.len());
        for id in queues {
            if !optional_set.contains(&id) {
                push_unique(&mut required, id);
            }
        }

        Self {
            required,
            optional: optional_set,
        }
    }

    #[inline]
    fn route(&self) -> Routes<'_> {
        Routes {
            required: &self.required,
            optional: &self.optional,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Route {
    required: Vec<QueueId>,
    optional: Vec<QueueId>,
}

impl Route {
    fn new(required: Vec<QueueId>, optional: &[QueueId]) -> Self {
        let optional = optional
            .iter()
            .copied()
            .filter(|id| !required.contains(id))
            .fold(Vec::new(), |mut acc, id| {
                push_unique(&mut acc, id);
                acc
            });
        Self { required, optional }
    }
}

/// Picks queues by the value of a designated header
///
/// Header values without a required mapping use the default queues. Optional
/// queues come only from the optional mapping for the header value.
#[derive(Debug, Clone)]
pub struct MultiplexingSelector {
    header: String,
    mappings: HashMap<String, Route>,
    fallback: Route,
}

impl MultiplexingSelector {
    /// Build from resolved mappings
    ///
    /// # Errors
    ///
    /// Returns `MissingHeader` if `header` is empty.
    pub fn new(
        header: impl Into<String>,
        mapping: HashMap<String, Vec<QueueId>>,
        optional_mapping: HashMap<String, Vec<QueueId>>,
        default: Vec<QueueId>,
    ) -> Result<Self> {
        let header = header.into();
        if header.is_empty() {
            return Err(RoutingError::MissingHeader);
        }

        let default = dedup(default);
        let mut mappings: HashMap<String, Route> = mapping
            .into_iter()
            .map(|(value, queues)| {
                let optional = optional_mapping
                    .get(&value)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let route = Route::new(dedup(queues), optional);
                (value, route)
            })
            .collect();

        // Values with only an optional mapping still get the default queues
        for (value, optional) in &optional_mapping {
            if !mappings.contains_key(value) {
                mappings.insert(value.clone(), Route::new(default.clone(), optional));
            }
        }

        Ok(Self {
            header,
            mappings,
            fallback: Route::new(default, &[]),
        })
    }

    /// Header whose value selects the queues
    #[inline]
    pub fn header(&self) -> &str {
        &self.header
    }

    fn route(&self, event: &Event) -> Routes<'_> {
        let route = event
            .header(&self.header)
            .and_then(|value| self.mappings.get(value))
            .unwrap_or(&self.fallback);
        Routes {
            required: &route.required,
            optional: &route.optional,
        }
    }
}

/// Resolves queue names to ids and builds selectors
///
/// Queues are registered in the order their `MemoryQueue`s are created, so
/// a `QueueId` indexes the same position in the queue list.
#[derive(Debug, Default)]
pub struct SelectorBuilder {
    queue_ids: HashMap<String, QueueId>,
    queue_names: Vec<String>,
}

impl SelectorBuilder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue and get its ID
    ///
    /// If the queue is already registered, returns the existing ID.
    pub fn register_queue(&mut self, name: impl Into<String>) -> Result<QueueId> {
        let name = name.into();
        if let Some(&id) = self.queue_ids.get(&name) {
            return Ok(id);
        }

        let count = self.queue_names.len();
        let index = u16::try_from(count).map_err(|_| RoutingError::TooManyQueues {
            count: count + 1,
            max: QueueId::MAX as usize,
        })?;

        let id = QueueId::new(index);
        self.queue_ids.insert(name.clone(), id);
        self.queue_names.push(name);
        Ok(id)
    }

    /// Get the ID of a registered queue
    #[inline]
    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.queue_ids.get(name).copied()
    }

    /// Registered queue names, indexed by `QueueId`
    #[inline]
    pub fn queue_names(&self) -> &[String] {
        &self.queue_names
    }

    /// Resolve a list of queue names
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` for the first name that is not registered.
    pub fn resolve(&self, names: &[impl AsRef<str>]) -> Result<Vec<QueueId>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.queue_id(name)
                    .ok_or_else(|| RoutingError::unknown_queue(name))
            })
            .collect()
    }

    /// Build a replicating selector
    ///
    /// # Errors
    ///
    /// Returns `NoQueues` if `queues` is empty, `UnknownQueue` for names
    /// that were never registered.
    pub fn replicating(
        &self,
        queues: &[impl AsRef<str>],
        optional: &[impl AsRef<str>],
    ) -> Result<ChannelSelector> {
        if queues.is_empty() {
            return Err(RoutingError::NoQueues);
        }
        let queues = self.resolve(queues)?;
        let optional = self.resolve(optional)?;
        Ok(ChannelSelector::Replicating(ReplicatingSelector::new(
            queues, &optional,
        )))
    }

    /// Build a multiplexing selector
    ///
    /// # Errors
    ///
    /// Returns `MissingHeader` for an empty header and `UnknownQueue` for
    /// names that were never registered.
    pub fn multiplexing(
        &self,
        header: &str,
        mapping: &HashMap<String, Vec<String>>,
        optional_mapping: &HashMap<String, Vec<String>>,
        default: &[impl AsRef<str>],
    ) -> Result<ChannelSelector> {
        let resolve_map = |map: &HashMap<String, Vec<String>>| {
            map.iter()
                .map(|(value, names)| Ok((value.clone(), self.resolve(names.as_slice())?)))
                .collect::<Result<HashMap<_, _>>>()
        };

        let selector = MultiplexingSelector::new(
            header,
            resolve_map(mapping)?,
            resolve_map(optional_mapping)?,
            self.resolve(default)?,
        )?;
        Ok(ChannelSelector::Multiplexing(selector))
    }
}

fn push_unique(list: &mut Vec<QueueId>, id: QueueId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

fn dedup(queues: Vec<QueueId>) -> Vec<QueueId> {
    let mut out = Vec::with_capacity(queues.len());
    for id in queues {
        push_unique(&mut out, id);
    }
    out
}
