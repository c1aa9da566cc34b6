//! Paginating a controller set into fixed-size display screens, and the
//! registry of UI screens that want a per-frame update.

use synthctl_types::{Screen, SCREEN_CAPACITY};

use crate::controller_set::ControllerSet;

/// Title of the group for controllers that declare no group key.
pub const DEFAULT_GROUP_TITLE: &str = "Ctrls";

/// Options for [`group_screens`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupOptions {
    /// Lay out controllers even if they are marked not visible in the UI.
    pub include_hidden: bool,
}

struct Group {
    key: Option<String>,
    title: String,
    symbols: Vec<String>,
}

/// Title of page `page` (0-based) of a group. Only second and later pages
/// carry a suffix, so a group that fits one screen keeps its bare title.
pub fn screen_title(group_title: &str, page: usize) -> String {
    if page > 0 {
        format!("{}#{}", group_title, page)
    } else {
        group_title.to_string()
    }
}

/// Lay `set` out into screens of at most [`SCREEN_CAPACITY`] controllers.
///
/// Groups appear in first-seen order; members keep declaration order. The
/// group title is the first member's `group_title`, else its key, whether or
/// not that member is visible; the ungrouped controllers share
/// [`DEFAULT_GROUP_TITLE`]. Hidden controllers are dropped only when pages are
/// filled, so a group with no visible member yields no screen.
pub fn group_screens(set: &ControllerSet, options: GroupOptions) -> Vec<Screen> {
    let mut groups: Vec<Group> = Vec::new();
    for ctrl in set.iter() {
        let key = ctrl.group_key();
        let index = match groups.iter().position(|g| g.key == key) {
            Some(i) => i,
            None => {
                let title = match &key {
                    None => DEFAULT_GROUP_TITLE.to_string(),
                    Some(k) => ctrl.group_title().unwrap_or_else(|| k.clone()),
                };
                groups.push(Group {
                    key,
                    title,
                    symbols: Vec::new(),
                });
                groups.len() - 1
            }
        };
        if options.include_hidden || ctrl.visible_in_ui() {
            groups[index].symbols.push(ctrl.symbol().to_string());
        }
    }

    let mut screens = Vec::new();
    for group in groups {
        for (page, chunk) in group.symbols.chunks(SCREEN_CAPACITY).enumerate() {
            screens.push(Screen::new(screen_title(&group.title, page), chunk.to_vec()));
        }
    }
    screens
}

/// Per-frame refresh callback for a registered UI screen.
pub type UpdateHook = Box<dyn FnMut() + Send>;

struct RegisteredScreen {
    name: String,
    update: Option<UpdateHook>,
}

/// UI screens known to the controller, with their optional update capability
/// resolved at registration time.
#[derive(Default)]
pub struct ScreenRegistry {
    screens: Vec<RegisteredScreen>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a screen by name.
    pub fn register(&mut self, name: impl Into<String>, update: Option<UpdateHook>) {
        let name = name.into();
        match self.screens.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.update = update,
            None => self.screens.push(RegisteredScreen { name, update }),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.screens.len();
        self.screens.retain(|s| s.name != name);
        self.screens.len() != before
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.screens.iter().map(|s| s.name.as_str())
    }

    pub fn has_update_hook(&self, name: &str) -> bool {
        self.screens
            .iter()
            .any(|s| s.name == name && s.update.is_some())
    }

    /// Run every registered update hook; returns how many ran.
    pub fn refresh(&mut self) -> usize {
        let mut ran = 0;
        for hook in self.screens.iter_mut().filter_map(|s| s.update.as_mut()) {
            hook();
            ran += 1;
        }
        ran
    }
}
