//! Workspace-scoped OSC address resolution.
//!
//! Workspace-level messages are sent as `/workspace/{id}{address}`.
//! Connection and application-level messages stay unprefixed.

/// Addresses QLab handles at application level. Never workspace-prefixed.
pub const APPLICATION_COMMANDS: &[&str] = &[
    "/connect",
    "/disconnect",
    "/alwaysReply",
    "/version",
    "/updates",
    "/udpReplyPort",
    "/workspaces",
];

const WRITE_OPERATIONS: &[&str] = &["/new", "/move", "/delete"];

/// Property addresses: a read without arguments, a write with them.
const PROPERTY_OPERATIONS: &[&str] = &["/cue_id/", "/cueList_id/"];

const READ_OPERATIONS: &[&str] = &[
    "/connect",
    "/alwaysReply",
    "/updates",
    "/version",
    "/cueLists",
    "/cues",
    "/children",
    "/basePath",
    "/runningCues",
    "/selectedCues",
    "/settings/",
];

/// Short property names accepted from callers, mapped onto QLab's names.
fn property_alias(property: &str) -> &str {
    match property {
        "file" => "fileTarget",
        "cueTarget" => "cueTargetID",
        other => other,
    }
}

/// QLab answers `address` on `/reply{address}`.
pub fn reply_address(address: &str) -> String {
    format!("/reply{}", address)
}

/// Whether `address` mutates the workspace. Unknown addresses count as
/// writes so dry runs never leak them.
pub fn is_write(address: &str, has_args: bool) -> bool {
    if WRITE_OPERATIONS.iter().any(|op| address.contains(op)) {
        return true;
    }
    if PROPERTY_OPERATIONS.iter().any(|op| address.contains(op)) {
        return has_args;
    }
    !READ_OPERATIONS.iter().any(|op| address.contains(op))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressResolver {
    workspace_id: Option<String>,
}

impl AddressResolver {
    pub fn new(workspace_id: Option<String>) -> Self {
        Self {
            workspace_id: workspace_id.filter(|id| !id.is_empty()),
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn set_workspace(&mut self, workspace_id: &str) {
        self.workspace_id = Some(workspace_id.to_string()).filter(|id| !id.is_empty());
    }

    pub fn resolve(&self, address: &str) -> String {
        if !address.starts_with('/') || address.starts_with("/workspace/") {
            return address.to_string();
        }
        if APPLICATION_COMMANDS.iter().any(|cmd| address.starts_with(cmd)) {
            return address.to_string();
        }
        match &self.workspace_id {
            Some(id) => format!("/workspace/{}{}", id, address),
            None => address.to_string(),
        }
    }

    pub fn new_cue(&self) -> String {
        self.resolve("/new")
    }

    pub fn cue_property(&self, cue_id: &str, property: &str) -> String {
        self.resolve(&format!("/cue_id/{}/{}", cue_id, property_alias(property)))
    }

    /// Takes `[index, parent_id]` arguments.
    pub fn move_cue(&self, cue_id: &str) -> String {
        self.resolve(&format!("/move/{}", cue_id))
    }

    pub fn delete_cue(&self, cue_id: &str) -> String {
        self.resolve(&format!("/delete_id/{}", cue_id))
    }

    pub fn children(&self, cue_id: &str) -> String {
        self.resolve(&format!("/cue_id/{}/children", cue_id))
    }

    pub fn children_by_number(&self, number: &str) -> String {
        self.resolve(&format!("/cue/{}/children", number))
    }

    pub fn cue_lists(&self) -> String {
        self.resolve("/cueLists")
    }

    pub fn cue_lists_shallow(&self) -> String {
        self.resolve("/cueLists/shallow")
    }

    pub fn cue_list_ids(&self) -> String {
        self.resolve("/cueLists/uniqueIDs")
    }

    pub fn running_cues(&self) -> String {
        self.resolve("/runningCues/shallow")
    }

    pub fn selected_cues(&self) -> String {
        self.resolve("/selectedCues/shallow")
    }

    pub fn base_path(&self) -> String {
        self.resolve("/basePath")
    }

    pub fn video_stages(&self) -> String {
        self.resolve("/settings/video/stages")
    }
}
