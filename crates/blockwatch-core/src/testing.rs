// In-memory fakes for the query and surface ports.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{ChannelFilter, ChannelHandle, ChannelId, DisplayPermissions, ObservedState, TenantId, UserId};
use crate::query::{QueryClient, QueryError};
use crate::surface::{DisplaySurface, SurfaceError};

pub(crate) fn observed(online: u32, capacity: u32, names: &[&str]) -> ObservedState {
    ObservedState {
        online,
        capacity,
        roster: names.iter().map(|n| (*n).to_owned()).collect(),
        motd: "A Minecraft Server".into(),
    }
}

// ── Query ────────────────────────────────────────────────────────────

/// Replays scripted results, then repeats the fallback.
pub(crate) struct FakeQuery {
    script: Mutex<VecDeque<Result<ObservedState, QueryError>>>,
    fallback: Mutex<Result<ObservedState, QueryError>>,
    resolutions: Mutex<HashMap<String, Vec<IpAddr>>>,
    stall: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl Default for FakeQuery {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Err(QueryError::TimedOut)),
            resolutions: Mutex::new(HashMap::new()),
            stall: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeQuery {
    pub(crate) fn push_ok(&self, observed: ObservedState) {
        self.script.lock().unwrap().push_back(Ok(observed));
    }

    pub(crate) fn push_err(&self, err: QueryError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub(crate) fn always(&self, result: Result<ObservedState, QueryError>) {
        *self.fallback.lock().unwrap() = result;
    }

    /// Make `host` resolve to `ips`. An empty list makes it unresolvable.
    pub(crate) fn resolve_to(&self, host: &str, ips: &[&str]) {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.resolutions.lock().unwrap().insert(host.to_owned(), ips);
    }

    /// Make the next query take `delay` before it answers.
    pub(crate) fn stall_next(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryClient for FakeQuery {
    async fn query(&self, _address: &str, _port: u16, _timeout: Duration) -> Result<ObservedState, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let result = next.unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        let stall = self.stall.lock().unwrap().take();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn resolve(&self, address: &str, _port: u16) -> Result<Vec<IpAddr>, QueryError> {
        match self.resolutions.lock().unwrap().get(address) {
            Some(ips) if ips.is_empty() => Err(QueryError::Unresolvable {
                host: address.to_owned(),
            }),
            Some(ips) => Ok(ips.clone()),
            None => Ok(address
                .parse::<IpAddr>()
                .map_or_else(|_| vec!["203.0.113.10".parse().unwrap()], |ip| vec![ip])),
        }
    }
}

// ── Surface ──────────────────────────────────────────────────────────

#[derive(Default)]
#[allow(clippy::struct_excessive_bools)]
struct SurfaceState {
    voice: Vec<(TenantId, ChannelHandle)>,
    text: Vec<(TenantId, ChannelId)>,
    next_id: u64,
    hidden: HashSet<TenantId>,
    admins: HashSet<(TenantId, UserId)>,
    messages: Vec<(ChannelId, String)>,
    renames: usize,
    deletes: usize,
    creates: usize,
    forbid_renames: bool,
    forbid_deletes: bool,
    forbid_posting: bool,
    fail_listing: bool,
}

impl SurfaceState {
    fn allocate(&mut self) -> ChannelId {
        self.next_id += 1;
        ChannelId(1000 + self.next_id)
    }
}

/// A chat platform held in memory. Voice channels keep insertion order.
#[derive(Default)]
pub(crate) struct FakeSurface {
    state: Mutex<SurfaceState>,
}

fn forbidden() -> SurfaceError {
    SurfaceError::Forbidden {
        message: "Missing Permissions".into(),
    }
}

impl FakeSurface {
    pub(crate) fn seed(&self, space: TenantId, name: &str) -> ChannelId {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate();
        state.voice.push((
            space,
            ChannelHandle {
                id,
                name: name.to_owned(),
            },
        ));
        id
    }

    pub(crate) fn add_text_channel(&self, space: TenantId, id: ChannelId) {
        self.state.lock().unwrap().text.push((space, id));
    }

    pub(crate) fn names(&self, space: TenantId) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .voice
            .iter()
            .filter(|(s, _)| *s == space)
            .map(|(_, c)| c.name.clone())
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().unwrap().messages.clone()
    }

    pub(crate) fn rename_count(&self) -> usize {
        self.state.lock().unwrap().renames
    }

    pub(crate) fn delete_count(&self) -> usize {
        self.state.lock().unwrap().deletes
    }

    pub(crate) fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub(crate) fn grant_admin(&self, space: TenantId, user: UserId) {
        self.state.lock().unwrap().admins.insert((space, user));
    }

    pub(crate) fn hide_space(&self, space: TenantId) {
        self.state.lock().unwrap().hidden.insert(space);
    }

    pub(crate) fn forbid_renames(&self) {
        self.state.lock().unwrap().forbid_renames = true;
    }

    pub(crate) fn forbid_deletes(&self) {
        self.state.lock().unwrap().forbid_deletes = true;
    }

    pub(crate) fn forbid_posting(&self) {
        self.state.lock().unwrap().forbid_posting = true;
    }

    pub(crate) fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }
}

#[async_trait]
impl DisplaySurface for FakeSurface {
    async fn list_channels(&self, space: TenantId, filter: &ChannelFilter) -> Result<Vec<ChannelHandle>, SurfaceError> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            return Err(SurfaceError::Unavailable {
                message: "503 Service Unavailable".into(),
            });
        }
        if state.hidden.contains(&space) {
            return Err(forbidden());
        }
        Ok(state
            .voice
            .iter()
            .filter(|(s, _)| *s == space && filter.matches(true))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn create_display_channel(
        &self,
        space: TenantId,
        name: &str,
        _permissions: &DisplayPermissions,
    ) -> Result<ChannelHandle, SurfaceError> {
        let mut state = self.state.lock().unwrap();
        let handle = ChannelHandle {
            id: state.allocate(),
            name: name.to_owned(),
        };
        state.voice.push((space, handle.clone()));
        state.creates += 1;
        Ok(handle)
    }

    async fn rename_channel(&self, channel: &ChannelHandle, name: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.forbid_renames {
            return Err(forbidden());
        }
        let Some((_, target)) = state.voice.iter_mut().find(|(_, c)| c.id == channel.id) else {
            return Err(SurfaceError::Unavailable {
                message: "404 Unknown Channel".into(),
            });
        };
        name.clone_into(&mut target.name);
        state.renames += 1;
        Ok(())
    }

    async fn delete_channel(&self, channel: &ChannelHandle) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.forbid_deletes {
            return Err(forbidden());
        }
        let before = state.voice.len();
        state.voice.retain(|(_, c)| c.id != channel.id);
        if state.voice.len() < before {
            state.deletes += 1;
        }
        Ok(())
    }

    async fn post_message(&self, channel: ChannelId, text: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if state.forbid_posting {
            return Err(forbidden());
        }
        state.messages.push((channel, text.to_owned()));
        Ok(())
    }

    async fn resolve_channel(&self, space: TenantId, id: ChannelId) -> Result<Option<ChannelId>, SurfaceError> {
        let state = self.state.lock().unwrap();
        let found = state.text.iter().any(|(s, c)| *s == space && *c == id)
            || state.voice.iter().any(|(s, c)| *s == space && c.id == id);
        Ok(found.then_some(id))
    }

    async fn space_visible(&self, space: TenantId) -> Result<bool, SurfaceError> {
        Ok(!self.state.lock().unwrap().hidden.contains(&space))
    }

    async fn is_administrator(&self, space: TenantId, user: UserId) -> Result<bool, SurfaceError> {
        Ok(self.state.lock().unwrap().admins.contains(&(space, user)))
    }
}
