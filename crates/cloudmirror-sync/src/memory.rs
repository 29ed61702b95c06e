//! In-memory remote backend
//!
//! A reference implementation of every hook contract, backed by a map of
//! nodes behind a mutex. Supports failure injection per operation and call
//! counting, and can yield to the scheduler before every call to expose
//! interleavings between concurrent callers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use cloudmirror_core::domain::{
    newtypes::{RemoteId, SyncPath},
    properties::RemoteProperties,
    record::Provider,
};
use cloudmirror_core::ports::{
    CleanupHooks, CompareHooks, DownloadHooks, LockHooks, RemoteBackend, RemoteEntry,
    RemoteError, UploadHooks,
};

/// Id of the implicit root folder
pub const ROOT_ID: &str = "root";

/// Hook operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    UploadFolder,
    UploadFile,
    UpdateFile,
    SetMetadata,
    DeleteRemote,
    GetModifiedTime,
    NewVersion,
    ListChildren,
    ReadFile,
    EnsureBackupFolder,
    FolderExists,
    CreateSentinel,
}

/// Snapshot of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNode {
    pub name: String,
    pub parent: Option<String>,
    pub is_folder: bool,
    pub content: Vec<u8>,
    pub properties: RemoteProperties,
    pub modified: DateTime<Utc>,
    pub version: u32,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, MemoryNode>,
    next_id: u64,
    failures: VecDeque<(Op, RemoteError)>,
    calls: HashMap<Op, u32>,
}

impl State {
    fn allocate(&mut self, node: MemoryNode) -> Result<RemoteId, RemoteError> {
        self.next_id += 1;
        let raw = format!("m-{}", self.next_id);
        let id = to_remote_id(&raw)?;
        self.nodes.insert(raw, node);
        Ok(id)
    }

    fn folder(&self, id: &RemoteId) -> Result<&MemoryNode, RemoteError> {
        match self.nodes.get(id.as_str()) {
            Some(node) if node.is_folder => Ok(node),
            Some(_) => Err(RemoteError::Other(format!("{id} is not a folder"))),
            None => Err(RemoteError::NotFound(id.to_string())),
        }
    }

    fn node_mut(&mut self, id: &RemoteId) -> Result<&mut MemoryNode, RemoteError> {
        self.nodes
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn remove_recursive(&mut self, id: &str) {
        let children: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(id))
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            self.remove_recursive(&child);
        }
        self.nodes.remove(id);
    }
}

/// [`RemoteBackend`] keeping every object in process memory
#[derive(Debug)]
pub struct MemoryBackend {
    provider: Provider,
    account: String,
    yield_between_calls: bool,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(provider: Provider, account: impl Into<String>) -> Self {
        let mut state = State::default();
        state.nodes.insert(
            ROOT_ID.to_string(),
            MemoryNode {
                name: String::new(),
                parent: None,
                is_folder: true,
                content: Vec::new(),
                properties: RemoteProperties::new(),
                modified: Utc::now(),
                version: 1,
            },
        );
        Self {
            provider,
            account: account.into(),
            yield_between_calls: false,
            state: Mutex::new(state),
        }
    }

    /// Yields to the runtime before every hook call
    pub fn yielding(mut self) -> Self {
        self.yield_between_calls = true;
        self
    }

    /// Makes the next call of `op` fail with `error`
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.lock().failures.push_back((op, error));
    }

    /// Number of calls made to `op`, failed ones included
    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of stored objects, the root excluded
    pub fn object_count(&self) -> usize {
        self.lock().nodes.len() - 1
    }

    pub fn node(&self, id: &RemoteId) -> Option<MemoryNode> {
        self.lock().nodes.get(id.as_str()).cloned()
    }

    pub fn exists(&self, id: &RemoteId) -> bool {
        self.lock().nodes.contains_key(id.as_str())
    }

    /// Ids of the direct children of `parent`, sorted by name
    pub fn children_of(&self, parent: &RemoteId) -> Vec<(RemoteId, MemoryNode)> {
        let state = self.lock();
        let mut children: Vec<_> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(parent.as_str()))
            .filter_map(|(id, node)| Some((to_remote_id(id).ok()?, node.clone())))
            .collect();
        children.sort_by(|a, b| a.1.name.cmp(&b.1.name).then_with(|| a.0.cmp(&b.0)));
        children
    }

    pub fn find_child(&self, parent: &RemoteId, name: &str) -> Option<RemoteId> {
        self.children_of(parent)
            .into_iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
    }

    pub fn set_modified(&self, id: &RemoteId, modified: DateTime<Utc>) -> bool {
        match self.lock().nodes.get_mut(id.as_str()) {
            Some(node) => {
                node.modified = modified;
                true
            }
            None => false,
        }
    }

    /// Stores an object directly, bypassing hooks
    pub fn put(
        &self,
        parent: &RemoteId,
        name: &str,
        is_folder: bool,
        content: &[u8],
        properties: RemoteProperties,
    ) -> Result<RemoteId, RemoteError> {
        let mut state = self.lock();
        state.folder(parent)?;
        state.allocate(MemoryNode {
            name: name.to_string(),
            parent: Some(parent.as_str().to_string()),
            is_folder,
            content: content.to_vec(),
            properties,
            modified: Utc::now(),
            version: 1,
        })
    }

    /// Removes an object and its descendants, bypassing hooks
    pub fn remove(&self, id: &RemoteId) -> bool {
        let mut state = self.lock();
        let existed = state.nodes.contains_key(id.as_str());
        state.remove_recursive(id.as_str());
        existed
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and pops an injected failure, if any
    async fn enter(&self, op: Op) -> Result<(), RemoteError> {
        if self.yield_between_calls {
            tokio::task::yield_now().await;
        }
        let mut state = self.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = state.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn to_remote_id(raw: &str) -> Result<RemoteId, RemoteError> {
    RemoteId::new(raw).map_err(|e| RemoteError::Other(e.to_string()))
}

async fn read_local(path: &SyncPath) -> Result<Vec<u8>, RemoteError> {
    tokio::fs::read(path.as_path())
        .await
        .map_err(|e| RemoteError::Other(format!("failed to read {path}: {e}")))
}

#[async_trait]
impl UploadHooks for MemoryBackend {
    async fn upload_folder(
        &self,
        name: &str,
        parent_id: &RemoteId,
        _local_path: &SyncPath,
    ) -> Result<RemoteId, RemoteError> {
        self.enter(Op::UploadFolder).await?;
        self.put(parent_id, name, true, &[], RemoteProperties::new())
    }

    async fn upload_file(
        &self,
        local_path: &SyncPath,
        parent_id: &RemoteId,
    ) -> Result<RemoteId, RemoteError> {
        self.enter(Op::UploadFile).await?;
        let content = read_local(local_path).await?;
        let name = local_path.file_name().unwrap_or_else(|| local_path.to_key());
        self.put(parent_id, &name, false, &content, RemoteProperties::new())
    }

    async fn update_file(
        &self,
        remote_id: &RemoteId,
        local_path: &SyncPath,
    ) -> Result<(), RemoteError> {
        self.enter(Op::UpdateFile).await?;
        let content = read_local(local_path).await?;
        let mut state = self.lock();
        let node = state.node_mut(remote_id)?;
        node.content = content;
        node.modified = Utc::now();
        Ok(())
    }

    async fn set_metadata(
        &self,
        remote_id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<(), RemoteError> {
        self.enter(Op::SetMetadata).await?;
        self.lock().node_mut(remote_id)?.properties.extend(properties);
        Ok(())
    }
}

#[async_trait]
impl CleanupHooks for MemoryBackend {
    async fn delete_remote(
        &self,
        remote_id: &RemoteId,
        _is_directory: bool,
    ) -> Result<(), RemoteError> {
        self.enter(Op::DeleteRemote).await?;
        if remote_id.as_str() == ROOT_ID {
            return Err(RemoteError::Forbidden("the root folder cannot be deleted".into()));
        }
        let mut state = self.lock();
        if !state.nodes.contains_key(remote_id.as_str()) {
            return Err(RemoteError::NotFound(remote_id.to_string()));
        }
        state.remove_recursive(remote_id.as_str());
        Ok(())
    }
}

#[async_trait]
impl CompareHooks for MemoryBackend {
    async fn get_remote_modified_time(
        &self,
        remote_id: &RemoteId,
    ) -> Result<DateTime<Utc>, RemoteError> {
        self.enter(Op::GetModifiedTime).await?;
        Ok(self.lock().node_mut(remote_id)?.modified)
    }

    async fn new_version(
        &self,
        remote_id: &RemoteId,
        local_path: &SyncPath,
    ) -> Result<(), RemoteError> {
        self.enter(Op::NewVersion).await?;
        let content = read_local(local_path).await?;
        let mut state = self.lock();
        let node = state.node_mut(remote_id)?;
        node.content = content;
        node.version += 1;
        node.modified = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl DownloadHooks for MemoryBackend {
    async fn list_children(&self, parent_id: &RemoteId) -> Result<Vec<RemoteEntry>, RemoteError> {
        self.enter(Op::ListChildren).await?;
        self.lock().folder(parent_id)?;
        Ok(self
            .children_of(parent_id)
            .into_iter()
            .map(|(id, node)| RemoteEntry {
                id,
                name: node.name,
                is_folder: node.is_folder,
                properties: node.properties,
            })
            .collect())
    }

    async fn read_file(
        &self,
        remote_id: &RemoteId,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, RemoteError> {
        self.enter(Op::ReadFile).await?;
        let content = {
            let mut state = self.lock();
            let node = state.node_mut(remote_id)?;
            if node.is_folder {
                return Err(RemoteError::Other(format!("{remote_id} is a folder")));
            }
            node.content.clone()
        };
        sink.write_all(&content)
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(content.len() as u64)
    }
}

#[async_trait]
impl LockHooks for MemoryBackend {
    async fn ensure_backup_folder(&self, name: &str) -> Result<RemoteId, RemoteError> {
        self.enter(Op::EnsureBackupFolder).await?;
        let root = to_remote_id(ROOT_ID)?;
        let existing = self
            .children_of(&root)
            .into_iter()
            .find(|(_, node)| node.is_folder && node.name == name);
        match existing {
            Some((id, _)) => Ok(id),
            None => self.put(&root, name, true, &[], RemoteProperties::new()),
        }
    }

    async fn folder_exists(&self, folder_id: &RemoteId) -> Result<bool, RemoteError> {
        self.enter(Op::FolderExists).await?;
        Ok(self.lock().folder(folder_id).is_ok())
    }

    async fn create_sentinel(
        &self,
        parent_id: &RemoteId,
        name: &str,
        properties: &RemoteProperties,
    ) -> Result<RemoteId, RemoteError> {
        self.enter(Op::CreateSentinel).await?;
        self.put(parent_id, name, false, &[], properties.clone())
    }
}

impl RemoteBackend for MemoryBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn account(&self) -> &str {
        &self.account
    }
}
