//! A QLab workspace reached over OSC.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cueconf::SyncConfig;
use cueproto::address::is_write;
use cueproto::{AddressResolver, OscArg, OscClient, OscMessage, Reply, ReplyError};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cue::Cue;
use crate::error::{SyncError, SyncResult, SyncResultExt};
use crate::remote::{RemoteWorkspace, VideoStage};
use crate::tree::CueTree;

/// Property queries issued at once while enriching a live tree.
const ENRICH_CONCURRENCY: usize = 8;

/// Properties `/cueLists` leaves out that comparison needs.
const ENRICHED_PROPERTIES: [&str; 2] = ["fileTarget", "cueTargetNumber"];

pub struct QlabWorkspace {
    client: Arc<OscClient>,
    addresses: Mutex<AddressResolver>,
    settings: SyncConfig,
    dry_run: bool,
    dry_run_cues: AtomicU32,
    inbox_id: Mutex<Option<String>>,
    cue_lists: tokio::sync::Mutex<Option<CueTree>>,
}

impl QlabWorkspace {
    pub fn new(client: Arc<OscClient>, settings: SyncConfig) -> Self {
        let dry_run = settings.dry_run;
        Self {
            client,
            addresses: Mutex::new(AddressResolver::new(None)),
            settings,
            dry_run,
            dry_run_cues: AtomicU32::new(0),
            inbox_id: Mutex::new(None),
            cue_lists: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn settings(&self) -> &SyncConfig {
        &self.settings
    }

    pub fn client(&self) -> &Arc<OscClient> {
        &self.client
    }

    fn addresses(&self) -> AddressResolver {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn workspace_id(&self) -> Option<String> {
        self.addresses().workspace_id().map(str::to_string)
    }

    pub fn inbox_id(&self) -> Option<String> {
        self.inbox_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn connected(&self, operation: &'static str) -> SyncResult<AddressResolver> {
        let addresses = self.addresses();
        if addresses.workspace_id().is_none() {
            return Err(SyncError::NotConnected(operation));
        }
        Ok(addresses)
    }

    /// Send a resolved address. Writes are answered locally in dry-run mode.
    async fn request(&self, address: &str, args: Vec<OscArg>) -> SyncResult<Reply> {
        if self.dry_run && is_write(address, !args.is_empty()) {
            let message = OscMessage::with_args(address, args);
            info!("DRY RUN: would send {}", message);
            return Ok(self.dry_run_reply(address));
        }
        Ok(self.client.request(address, args).await?)
    }

    fn dry_run_reply(&self, address: &str) -> Reply {
        let data = if address.ends_with("/new") {
            let n = self.dry_run_cues.fetch_add(1, Ordering::Relaxed) + 1;
            Value::String(format!(
                "DRYRUN-{:08X}-{:04X}-4000-8000-000000000{:03X}",
                n,
                n & 0xFFFF,
                n & 0xFFF
            ))
        } else {
            Value::Null
        };
        Reply {
            workspace_id: self.workspace_id(),
            address: Some(address.to_string()),
            status: "ok".to_string(),
            data,
            error: None,
        }
    }

    /// Connect to the workspace, then prepare it for a pass. Returns the
    /// workspace ID.
    pub async fn connect(&self, passcode: Option<&str>) -> SyncResult<String> {
        let args = match passcode.filter(|p| !p.is_empty()) {
            Some(p) => vec![OscArg::from(p)],
            None => Vec::new(),
        };

        let reply = match self.client.request("/connect", args).await {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => {
                return Err(SyncError::ConnectionRejected(format!(
                    "connection timeout - is QLab running and accessible at {}?",
                    self.client.endpoint()
                )))
            }
            Err(ReplyError::Status { body, .. }) if body.contains("badpass") => {
                return Err(SyncError::AuthenticationFailed)
            }
            Err(ReplyError::Status { body, .. }) => {
                debug!("Connect rejected:\n{}", body);
                return Err(SyncError::ConnectionRejected(
                    "QLab connection failed - check passcode and workspace availability".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if reply.data_str() == Some("badpass") {
            return Err(SyncError::AuthenticationFailed);
        }
        if !reply.is_ok() {
            return Err(SyncError::ConnectionRejected(format!(
                "unexpected connection status: {}",
                reply.status
            )));
        }
        let workspace_id = reply.workspace_id.clone().filter(|id| !id.is_empty()).ok_or_else(|| {
            SyncError::ConnectionRejected("QLab did not report a workspace ID".to_string())
        })?;

        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_workspace(&workspace_id);
        info!("Connected to QLab workspace {} ({})", workspace_id, self.client.endpoint());

        if let Err(e) = self.client.request("/alwaysReply", vec![OscArg::Int(1)]).await {
            warn!("Failed to enable alwaysReply: {}", e);
        }

        match self.ensure_inbox().await {
            Ok(id) => debug!("Inbox list: {}", id),
            Err(e) => warn!("Failed to ensure inbox list '{}': {}", self.settings.inbox_list_name, e),
        }

        match self.cue_lists().await {
            Ok(lists) => debug!("Indexed {} existing cues", lists.cue_count()),
            Err(e) => warn!("Failed to index existing cues: {}", e),
        }

        Ok(workspace_id)
    }

    pub async fn disconnect(&self) -> SyncResult<()> {
        self.client.send("/disconnect", Vec::new()).await?;
        Ok(())
    }

    /// Find the staging list by name, creating it if needed.
    pub async fn ensure_inbox(&self) -> SyncResult<String> {
        if let Some(id) = self.inbox_id() {
            return Ok(id);
        }
        let name = self.settings.inbox_list_name.clone();

        let lists = self.cue_lists().await?;
        let existing = lists
            .lists
            .iter()
            .find(|list| list.name_str() == name)
            .and_then(|list| list.unique_id.clone());

        let id = match existing {
            Some(id) => {
                info!("Found existing inbox list '{}': {}", name, id);
                id
            }
            None => {
                let id = self.create_cue("list").await.with_context(|| "failed to create inbox list")?;
                if let Err(e) = self.set_property(&id, "name", &name).await {
                    warn!("Failed to name inbox list {}: {}", id, e);
                }
                info!("Created inbox list '{}': {}", name, id);
                self.invalidate_caches().await;
                id
            }
        };
        *self.inbox_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        Ok(id)
    }

    /// Subscribe to QLab's push updates and ask it to start sending them.
    pub async fn start_updates(&self) -> SyncResult<broadcast::Receiver<OscMessage>> {
        let updates = self.client.subscribe_updates();
        self.client.send("/updates", vec![OscArg::Int(1)]).await?;
        Ok(updates)
    }

    pub async fn running_cues(&self) -> SyncResult<Vec<Cue>> {
        let address = self.connected("running cues")?.running_cues();
        let reply = self.request(&address, Vec::new()).await?;
        parse_cue_array(&address, reply.data)
    }

    pub async fn selected_cues(&self) -> SyncResult<Vec<Cue>> {
        let address = self.connected("selected cues")?.selected_cues();
        let reply = self.request(&address, Vec::new()).await?;
        parse_cue_array(&address, reply.data)
    }

    /// Delete every top-level cue in every list. Returns how many went.
    pub async fn clear_all_cues(&self) -> SyncResult<usize> {
        self.invalidate_caches().await;
        let lists = self.cue_lists().await?;
        let mut deleted = 0;
        for cue in lists.roots() {
            if let Some(id) = &cue.unique_id {
                self.delete_cue(id).await?;
                deleted += 1;
            }
        }
        self.invalidate_caches().await;
        info!("Cleared {} cue(s)", deleted);
        Ok(deleted)
    }

    async fn query_lists(&self, address: &str) -> SyncResult<CueTree> {
        let reply = self.request(address, Vec::new()).await?;
        CueTree::from_value(&json!({ "data": reply.data }))
    }

    /// QLab sometimes answers `/cueLists` with empty lists; ask each for
    /// its children directly.
    async fn fill_empty_lists(&self, addresses: &AddressResolver, tree: &mut CueTree) {
        for list in tree.lists.iter_mut().filter(|l| l.cues.is_empty()) {
            let address = match (&list.unique_id, &list.number) {
                (Some(id), _) => addresses.children(id),
                (None, Some(number)) => addresses.children_by_number(number),
                (None, None) => continue,
            };
            match self.request(&address, Vec::new()).await {
                Ok(reply) => match parse_cue_array(&address, reply.data) {
                    Ok(children) => list.cues = children,
                    Err(e) => debug!("Ignoring children of {}: {}", list, e),
                },
                Err(e) => debug!("Failed to fetch children of {}: {}", list, e),
            }
        }
    }

    /// Fill in properties `/cueLists` doesn't report.
    async fn enrich(&self, addresses: &AddressResolver, tree: &mut CueTree) {
        let mut ids = Vec::new();
        collect_ids(&tree.lists, &mut ids);
        collect_ids(&tree.cues, &mut ids);

        let mut pending: Box<dyn Iterator<Item = (String, &'static str)> + Send> = Box::new(ids
            .into_iter()
            .flat_map(|id| ENRICHED_PROPERTIES.into_iter().map(move |p| (id.clone(), p))));
        let mut in_flight = FuturesUnordered::new();
        let mut values: HashMap<String, Vec<(&str, String)>> = HashMap::new();

        loop {
            while in_flight.len() < ENRICH_CONCURRENCY {
                let Some((id, property)) = pending.next() else {
                    break;
                };
                let client = Arc::clone(&self.client);
                let address = addresses.cue_property(&id, property);
                in_flight.push(async move {
                    let value = match client.request(&address, Vec::new()).await {
                        Ok(reply) if reply.is_ok() => reply.data_str().filter(|s| !s.is_empty()).map(str::to_string),
                        _ => None,
                    };
                    (id, property, value)
                });
            }
            let Some((id, property, value)) = in_flight.next().await else {
                break;
            };
            if let Some(value) = value {
                values.entry(id).or_default().push((property, value));
            }
        }
        apply_enrichment(&mut tree.lists, &values);
        apply_enrichment(&mut tree.cues, &values);
    }
}

fn parse_cue_array(address: &str, data: Value) -> SyncResult<Vec<Cue>> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .filter(Value::is_object)
            .map(|item| {
                Cue::from_value(item).map_err(|e| {
                    SyncError::Remote(ReplyError::Decode {
                        address: address.to_string(),
                        message: e.to_string(),
                    })
                })
            })
            .collect(),
        other => Err(SyncError::Remote(ReplyError::Decode {
            address: address.to_string(),
            message: format!("expected a cue array, got {}", other),
        })),
    }
}

fn collect_ids(cues: &[Cue], out: &mut Vec<String>) {
    for cue in cues {
        if !cue.is_list() {
            if let Some(id) = &cue.unique_id {
                out.push(id.clone());
            }
        }
        collect_ids(&cue.cues, out);
    }
}

fn apply_enrichment(cues: &mut [Cue], values: &HashMap<String, Vec<(&str, String)>>) {
    for cue in cues.iter_mut() {
        if let Some(found) = cue.unique_id.as_ref().and_then(|id| values.get(id)) {
            for (property, value) in found {
                match *property {
                    "fileTarget" => cue.file_target = Some(value.clone()),
                    "cueTargetNumber" => cue.cue_target_number = Some(value.clone()),
                    _ => {}
                }
            }
        }
        apply_enrichment(&mut cue.cues, values);
    }
}

#[async_trait]
impl RemoteWorkspace for QlabWorkspace {
    async fn create_cue(&self, cue_type: &str) -> SyncResult<String> {
        let address = self.connected("cue creation")?.new_cue();
        let reply = match self.request(&address, vec![OscArg::from(cue_type)]).await {
            Ok(reply) => reply,
            Err(SyncError::Remote(ReplyError::Status { body, .. })) if body.contains("badpass") => {
                return Err(SyncError::AuthenticationFailed)
            }
            Err(e @ SyncError::Remote(ReplyError::Status { .. })) => {
                return Err(e.context("QLab rejected cue creation"))
            }
            Err(e) => return Err(e),
        };

        match reply.data_str() {
            Some("badpass") => Err(SyncError::AuthenticationFailed),
            Some(id) if !id.is_empty() => {
                debug!("Created {} cue {}", cue_type, id);
                Ok(id.to_string())
            }
            _ => Err(SyncError::Remote(ReplyError::Decode {
                address,
                message: "no uniqueID in new cue reply".to_string(),
            })),
        }
    }

    async fn set_property(&self, cue_id: &str, property: &str, value: &str) -> SyncResult<()> {
        let address = self.connected("setting cue properties")?.cue_property(cue_id, property);
        self.request(&address, vec![OscArg::from(value)])
            .await
            .with_context(|| format!("failed to set {}={} for cue {}", property, value, cue_id))?;
        debug!("Set {}={} on cue {}", property, value, cue_id);
        Ok(())
    }

    async fn set_property_args(&self, cue_id: &str, property: &str, args: Vec<OscArg>) -> SyncResult<()> {
        let address = self.connected("setting cue properties")?.cue_property(cue_id, property);
        let shown = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
        self.request(&address, args)
            .await
            .with_context(|| format!("failed to set {}=[{}] for cue {}", property, shown, cue_id))?;
        Ok(())
    }

    async fn move_cue(&self, cue_id: &str, index: usize, parent_id: &str) -> SyncResult<()> {
        let address = self.connected("moving cues")?.move_cue(cue_id);
        let index = i32::try_from(index).unwrap_or(i32::MAX);
        self.request(&address, vec![OscArg::Int(index), OscArg::from(parent_id)])
            .await
            .with_context(|| format!("failed to move cue {} to index {} of {}", cue_id, index, parent_id))?;
        debug!("Moved cue {} to index {} of {}", cue_id, index, parent_id);
        Ok(())
    }

    async fn delete_cue(&self, cue_id: &str) -> SyncResult<()> {
        let address = self.connected("deleting cues")?.delete_cue(cue_id);
        self.request(&address, Vec::new())
            .await
            .with_context(|| format!("failed to delete cue {}", cue_id))?;
        debug!("Deleted cue {}", cue_id);
        Ok(())
    }

    async fn query_state(&self) -> SyncResult<CueTree> {
        let addresses = self.connected("querying workspace state")?;
        let mut tree = self.query_lists(&addresses.cue_lists()).await?;

        if tree.cue_count() == 0 {
            self.fill_empty_lists(&addresses, &mut tree).await;
        }
        self.enrich(&addresses, &mut tree).await;

        info!("Queried {} cue(s) in {} list(s)", tree.cue_count(), tree.lists.len());
        *self.cue_lists.lock().await = Some(tree.clone());
        Ok(tree)
    }

    async fn query_state_lightweight(&self) -> SyncResult<CueTree> {
        let addresses = self.connected("querying workspace state")?;
        let tree = self.query_lists(&addresses.cue_lists_shallow()).await?;
        info!("Lightweight query returned {} list(s)", tree.lists.len());
        Ok(tree)
    }

    async fn cue_lists(&self) -> SyncResult<CueTree> {
        let mut memo = self.cue_lists.lock().await;
        if let Some(tree) = memo.as_ref() {
            return Ok(tree.clone());
        }
        let address = self.connected("listing cue lists")?.cue_lists();
        let tree = self.query_lists(&address).await?;
        *memo = Some(tree.clone());
        Ok(tree)
    }

    async fn video_stages(&self) -> SyncResult<Vec<VideoStage>> {
        let address = self.connected("listing video stages")?.video_stages();
        let reply = self.request(&address, Vec::new()).await?;
        serde_json::from_value(reply.data).map_err(|e| {
            SyncError::Remote(ReplyError::Decode {
                address,
                message: e.to_string(),
            })
        })
    }

    async fn invalidate_caches(&self) {
        *self.cue_lists.lock().await = None;
    }

    async fn base_path(&self) -> SyncResult<Option<String>> {
        let addresses = self.connected("resolving the base path")?;
        for address in [addresses.base_path(), addresses.resolve("/workingDirectory")] {
            match self.request(&address, Vec::new()).await {
                Ok(reply) => {
                    if let Some(path) = reply.data_str().filter(|p| !p.is_empty()) {
                        return Ok(Some(path.to_string()));
                    }
                }
                Err(e) => debug!("No path from {}: {}", address, e),
            }
        }
        Ok(None)
    }
}
