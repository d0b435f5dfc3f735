//! Theme descriptors, directory discovery and the theme selection adapter.
//!
//! A theme is a directory holding at least `00.png` (first numbered frame)
//! and `Theme.png` (preview). Further numbered frames or a video container
//! make it animated.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::event_bus::EventEmitter;
use crate::core::events::{ThemeFilterChangedEvent, ThemeSelectedEvent, ThemesLoadedEvent};
use crate::entities::video;
use crate::settings::{KEY_SELECTED_THEME, SettingsStore};

pub const BACKGROUND_FILE: &str = "00.png";
pub const PREVIEW_FILE: &str = "Theme.png";
const USER_PREFIX: &str = "Custom";

/// Category key -> display label. `"all"` disables category filtering.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("all", "All"),
    ("a", "Gallery"),
    ("b", "Tech"),
    ("c", "HUD"),
    ("d", "Light"),
    ("e", "Nature"),
    ("y", "Aesthetic"),
];

pub fn category_label(key: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, label)| *label)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeInfo {
    pub name: String,
    pub category: Option<char>,
    pub preview: PathBuf,
    pub source_dir: PathBuf,
    pub is_user: bool,
    pub has_video: bool,
}

impl ThemeInfo {
    /// Descriptor for `dir` if it holds a background frame and a preview
    pub fn from_dir(dir: &Path) -> Option<Self> {
        if !dir.join(BACKGROUND_FILE).is_file() || !dir.join(PREVIEW_FILE).is_file() {
            return None;
        }
        let name = dir.file_name()?.to_string_lossy().into_owned();
        let category = name
            .chars()
            .next()
            .map(|c| c.to_ascii_lowercase())
            .filter(|c| c.is_ascii_alphabetic() && category_label(&c.to_string()).is_some());
        Some(Self {
            is_user: name.starts_with(USER_PREFIX),
            category,
            preview: dir.join(PREVIEW_FILE),
            source_dir: dir.to_path_buf(),
            has_video: video::find_video(dir).is_some(),
            name,
        })
    }

    pub fn background(&self) -> PathBuf {
        self.source_dir.join(BACKGROUND_FILE)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThemeFilter {
    #[default]
    All,
    Default,
    User,
}

impl std::str::FromStr for ThemeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ThemeFilter::All),
            "default" => Ok(ThemeFilter::Default),
            "user" => Ok(ThemeFilter::User),
            other => Err(format!("Unknown theme filter: {}", other)),
        }
    }
}

/// Valid theme directories directly under `root`, sorted by name
pub fn discover_themes(root: &Path) -> Vec<ThemeInfo> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read theme directory {}: {}", root.display(), e);
            return Vec::new();
        }
    };
    let mut themes: Vec<ThemeInfo> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let theme = ThemeInfo::from_dir(&p);
            if theme.is_none() {
                debug!("Skipping {}: missing {} or {}", p.display(), BACKGROUND_FILE, PREVIEW_FILE);
            }
            theme
        })
        .collect();
    themes.sort_by(|a, b| a.name.cmp(&b.name));
    themes
}

pub struct ThemeSelection {
    directory: Option<PathBuf>,
    themes: Vec<ThemeInfo>,
    filter: ThemeFilter,
    category: Option<String>,
    selected: Option<ThemeInfo>,
    settings: Option<SettingsStore>,
    emitter: EventEmitter,
}

impl ThemeSelection {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            directory: None,
            themes: Vec::new(),
            filter: ThemeFilter::All,
            category: None,
            selected: None,
            settings: None,
            emitter,
        }
    }

    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn set_directory(&mut self, dir: impl Into<PathBuf>) {
        self.directory = Some(dir.into());
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Rescan the directory. Fires `ThemesLoadedEvent` once per call.
    pub fn load_themes(&mut self) -> usize {
        self.themes = match &self.directory {
            Some(dir) => discover_themes(dir),
            None => Vec::new(),
        };
        info!("Loaded {} themes", self.themes.len());
        self.emitter.emit(ThemesLoadedEvent(self.themes.len()));
        self.themes.len()
    }

    pub fn set_filter(&mut self, filter: ThemeFilter) {
        self.filter = filter;
        self.emitter.emit(ThemeFilterChangedEvent(filter));
    }

    pub fn filter(&self) -> ThemeFilter {
        self.filter
    }

    /// `"all"` clears the category filter
    pub fn set_category(&mut self, category: &str) {
        self.category = if category.eq_ignore_ascii_case("all") || category.is_empty() {
            None
        } else {
            Some(category.to_ascii_lowercase())
        };
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Themes passing the current filter and category
    pub fn themes(&self) -> Vec<&ThemeInfo> {
        self.themes
            .iter()
            .filter(|t| match self.filter {
                ThemeFilter::All => true,
                ThemeFilter::Default => !t.is_user,
                ThemeFilter::User => t.is_user,
            })
            .filter(|t| match &self.category {
                None => true,
                Some(cat) => t.category.map(|c| c.to_string()).as_deref() == Some(cat.as_str()),
            })
            .collect()
    }

    pub fn all_themes(&self) -> &[ThemeInfo] {
        &self.themes
    }

    pub fn select(&mut self, theme: ThemeInfo) {
        info!("Theme selected: {}", theme.name);
        if let Some(settings) = &self.settings
            && let Err(e) = settings.set(
                KEY_SELECTED_THEME,
                serde_json::Value::String(theme.source_dir.to_string_lossy().into_owned()),
            )
        {
            warn!("Failed to persist selected theme: {:#}", e);
        }
        self.selected = Some(theme.clone());
        self.emitter.emit(ThemeSelectedEvent(theme));
    }

    pub fn selected(&self) -> Option<&ThemeInfo> {
        self.selected.as_ref()
    }

    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Theme from the list matching the persisted selection, if any
    pub fn restore(&self) -> Option<ThemeInfo> {
        let dir = self.settings.as_ref()?.get_str(KEY_SELECTED_THEME)?;
        self.themes
            .iter()
            .find(|t| t.source_dir.to_string_lossy() == dir)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("panelcast_themes_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_theme(root: &Path, name: &str, preview: bool) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(BACKGROUND_FILE), b"PNG").unwrap();
        if preview {
            std::fs::write(dir.join(PREVIEW_FILE), b"PNG").unwrap();
        }
        dir
    }

    fn theme(name: &str, is_user: bool) -> ThemeInfo {
        ThemeInfo {
            name: name.to_string(),
            category: name.chars().next().map(|c| c.to_ascii_lowercase()),
            preview: PathBuf::from(format!("/themes/{}/Theme.png", name)),
            source_dir: PathBuf::from(format!("/themes/{}", name)),
            is_user,
            has_video: false,
        }
    }

    #[test]
    fn test_initial_state() {
        let sel = ThemeSelection::new(EventEmitter::detached());
        assert!(sel.selected().is_none());
        assert!(sel.themes().is_empty());
    }

    #[test]
    fn test_discover_requires_background_and_preview() {
        let root = temp_root();
        make_theme(&root, "Theme1", true);
        make_theme(&root, "Broken", false);
        std::fs::write(root.join("stray.txt"), b"x").unwrap();

        let themes = discover_themes(&root);
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].name, "Theme1");
        assert!(!themes[0].is_user);
        assert!(!themes[0].has_video);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_discover_sorted_with_user_flag() {
        let root = temp_root();
        make_theme(&root, "b_tech", true);
        make_theme(&root, "Custom1", true);
        make_theme(&root, "a_gallery", true);

        let themes = discover_themes(&root);
        let names: Vec<&str> = themes.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Custom1", "a_gallery", "b_tech"]);
        assert!(themes[0].is_user);
        assert_eq!(themes[1].category, Some('a'));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_load_fires_once_even_when_empty() {
        let bus = EventBus::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        bus.subscribe::<ThemesLoadedEvent, _>(move |e| f.lock().unwrap().push(e.0));

        let root = temp_root();
        make_theme(&root, "T1", false);
        let mut sel = ThemeSelection::new(bus.emitter());
        sel.set_directory(&root);
        sel.load_themes();

        assert_eq!(*fired.lock().unwrap(), vec![0]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_set_filter_fires_event() {
        let bus = EventBus::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        bus.subscribe::<ThemeFilterChangedEvent, _>(move |e| f.lock().unwrap().push(e.0));

        let mut sel = ThemeSelection::new(bus.emitter());
        sel.set_filter(ThemeFilter::User);
        assert_eq!(sel.filter(), ThemeFilter::User);
        assert_eq!(*fired.lock().unwrap(), vec![ThemeFilter::User]);
    }

    #[test]
    fn test_set_category_all_clears() {
        let mut sel = ThemeSelection::new(EventEmitter::detached());
        sel.set_category("b");
        assert_eq!(sel.category(), Some("b"));
        sel.set_category("all");
        assert!(sel.category().is_none());
    }

    #[test]
    fn test_filtered_view() {
        let mut sel = ThemeSelection::new(EventEmitter::detached());
        sel.themes = vec![theme("alpha", false), theme("beta", false), theme("Custom", true)];

        sel.set_filter(ThemeFilter::User);
        assert_eq!(sel.themes().len(), 1);

        sel.set_filter(ThemeFilter::Default);
        sel.set_category("b");
        let names: Vec<&str> = sel.themes().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["beta"]);
    }

    #[test]
    fn test_select_fires_event() {
        let bus = EventBus::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&fired);
        bus.subscribe::<ThemeSelectedEvent, _>(move |e| f.lock().unwrap().push(e.0.name.clone()));

        let mut sel = ThemeSelection::new(bus.emitter());
        sel.select(theme("Test", false));
        assert_eq!(*fired.lock().unwrap(), vec!["Test".to_string()]);
        assert_eq!(sel.selected().map(|t| t.name.as_str()), Some("Test"));
    }

    #[test]
    fn test_categories_table() {
        assert!(CATEGORIES.iter().any(|(k, _)| *k == "all"));
        assert_eq!(category_label("a"), Some("Gallery"));
        assert!(category_label("z").is_none());
    }
}
