//! Native folder pickers behind one capability-checked interface.
//!
//! Each platform tool is a [`DialogBackend`]. [`NativeDialogAdapter`] detects the
//! backends once and afterwards only dispatches to tools that were found, so the
//! call site never branches on tool names. An empty capability set is normal
//! (headless servers, minimal desktops); callers then fall back to manual paths.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use thiserror::Error;

/// A platform's folder picker, as discovered by probing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogCapability {
    NativeLinux,
    NativeMacos,
    NativeWindows,
}

impl DialogCapability {
    /// The capability matching the OS this binary was built for.
    pub fn for_current_platform() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::NativeWindows)
        } else if cfg!(target_os = "macos") {
            Some(Self::NativeMacos)
        } else if cfg!(unix) {
            Some(Self::NativeLinux)
        } else {
            None
        }
    }
}

impl fmt::Display for DialogCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogCapability::NativeLinux => "native-linux",
            DialogCapability::NativeMacos => "native-macos",
            DialogCapability::NativeWindows => "native-windows",
        };
        f.write_str(name)
    }
}

/// Errors from opening a native folder picker
#[derive(Error, Debug)]
pub enum DialogError {
    #[error("No native folder picker available for {0}")]
    Unavailable(DialogCapability),

    #[error("Folder picker was dismissed")]
    Cancelled,

    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{0} returned an empty path")]
    EmptyOutput(String),

    #[error("Selected path is not valid UTF-8")]
    NonUtf8Path,
}

/// One platform folder-picker tool.
///
/// `pick_folder` blocks until the tool exits and returns the raw path text the
/// tool produced; validation is the caller's job.
pub trait DialogBackend: Send + Sync {
    fn capability(&self) -> DialogCapability;

    /// Name used in logs and errors
    fn tool_name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn pick_folder(&self, title: &str, start_dir: Option<&Utf8Path>) -> Result<String, DialogError>;
}

/// Search `PATH` for an executable, honouring `PATHEXT` on Windows.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;

    let extensions: Vec<String> = if cfg!(windows) {
        std::env::var("PATHEXT")
            .map(|exts| exts.split(';').map(str::to_string).collect())
            .unwrap_or_else(|_| vec![".EXE".to_string(), ".CMD".to_string(), ".BAT".to_string()])
    } else {
        vec![String::new()]
    };

    std::env::split_paths(&paths)
        .flat_map(|dir| {
            extensions
                .iter()
                .map(move |ext| dir.join(format!("{}{}", name, ext)))
        })
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run a picker executable and interpret its exit status.
///
/// Exit code 0 yields the first stdout line; exit code 1 is how zenity, kdialog
/// and osascript all report a dismissed dialog.
fn run_picker(program: &Path, tool: &str, args: &[String]) -> Result<String, DialogError> {
    tracing::debug!("Launching {} folder picker: {}", tool, program.display());

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| DialogError::Launch {
            tool: tool.to_string(),
            source,
        })?;

    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8(output.stdout).map_err(|_| DialogError::NonUtf8Path)?;
            let path = stdout.lines().next().unwrap_or("").trim().to_string();
            if path.is_empty() {
                Err(DialogError::EmptyOutput(tool.to_string()))
            } else {
                Ok(path)
            }
        }
        Some(1) => Err(DialogError::Cancelled),
        code => Err(DialogError::ToolFailed {
            tool: tool.to_string(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
    }
}

/// GNOME `zenity --file-selection --directory`
pub struct ZenityDialog {
    program: Option<PathBuf>,
}

impl ZenityDialog {
    pub fn new() -> Self {
        Self {
            program: find_executable("zenity"),
        }
    }

    /// Use a specific executable instead of searching `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn args(title: &str, start_dir: Option<&Utf8Path>) -> Vec<String> {
        let mut args = vec![
            "--file-selection".to_string(),
            "--directory".to_string(),
            format!("--title={}", title),
        ];
        if let Some(dir) = start_dir {
            // Trailing separator makes zenity open *inside* the directory
            args.push(format!("--filename={}/", dir));
        }
        args
    }
}

impl Default for ZenityDialog {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogBackend for ZenityDialog {
    fn capability(&self) -> DialogCapability {
        DialogCapability::NativeLinux
    }

    fn tool_name(&self) -> &str {
        "zenity"
    }

    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn pick_folder(&self, title: &str, start_dir: Option<&Utf8Path>) -> Result<String, DialogError> {
        let program = self
            .program
            .as_deref()
            .ok_or(DialogError::Unavailable(self.capability()))?;
        run_picker(program, self.tool_name(), &Self::args(title, start_dir))
    }
}

/// KDE `kdialog --getexistingdirectory`
pub struct KDialog {
    program: Option<PathBuf>,
}

impl KDialog {
    pub fn new() -> Self {
        Self {
            program: find_executable("kdialog"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn args(title: &str, start_dir: Option<&Utf8Path>) -> Vec<String> {
        let mut args = vec!["--getexistingdirectory".to_string()];
        if let Some(dir) = start_dir {
            args.push(dir.to_string());
        }
        args.push("--title".to_string());
        args.push(title.to_string());
        args
    }
}

impl Default for KDialog {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogBackend for KDialog {
    fn capability(&self) -> DialogCapability {
        DialogCapability::NativeLinux
    }

    fn tool_name(&self) -> &str {
        "kdialog"
    }

    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn pick_folder(&self, title: &str, start_dir: Option<&Utf8Path>) -> Result<String, DialogError> {
        let program = self
            .program
            .as_deref()
            .ok_or(DialogError::Unavailable(self.capability()))?;
        run_picker(program, self.tool_name(), &Self::args(title, start_dir))
    }
}

/// macOS `choose folder` via `osascript`
pub struct OsaScriptDialog {
    program: Option<PathBuf>,
}

impl OsaScriptDialog {
    pub fn new() -> Self {
        Self {
            program: find_executable("osascript"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn script(title: &str, start_dir: Option<&Utf8Path>) -> String {
        let prompt = escape_applescript(title);
        match start_dir {
            Some(dir) => format!(
                "POSIX path of (choose folder with prompt \"{}\" default location POSIX file \"{}\")",
                prompt,
                escape_applescript(dir.as_str())
            ),
            None => format!("POSIX path of (choose folder with prompt \"{}\")", prompt),
        }
    }
}

impl Default for OsaScriptDialog {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl DialogBackend for OsaScriptDialog {
    fn capability(&self) -> DialogCapability {
        DialogCapability::NativeMacos
    }

    fn tool_name(&self) -> &str {
        "osascript"
    }

    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    fn pick_folder(&self, title: &str, start_dir: Option<&Utf8Path>) -> Result<String, DialogError> {
        let program = self
            .program
            .as_deref()
            .ok_or(DialogError::Unavailable(self.capability()))?;
        let args = vec!["-e".to_string(), Self::script(title, start_dir)];
        run_picker(program, self.tool_name(), &args)
    }
}

/// Windows common item dialog through `rfd`.
///
/// Only available in Windows builds; elsewhere it is detected as missing.
#[derive(Default)]
pub struct WindowsDialog;

impl DialogBackend for WindowsDialog {
    fn capability(&self) -> DialogCapability {
        DialogCapability::NativeWindows
    }

    fn tool_name(&self) -> &str {
        "rfd"
    }

    fn is_available(&self) -> bool {
        cfg!(windows)
    }

    #[cfg(windows)]
    fn pick_folder(&self, title: &str, start_dir: Option<&Utf8Path>) -> Result<String, DialogError> {
        use rfd::FileDialog;

        let mut dialog = FileDialog::new().set_title(title);
        if let Some(dir) = start_dir {
            dialog = dialog.set_directory(dir);
        }

        match dialog.pick_folder() {
            Some(path) => path
                .into_os_string()
                .into_string()
                .map_err(|_| DialogError::NonUtf8Path),
            None => Err(DialogError::Cancelled),
        }
    }

    #[cfg(not(windows))]
    fn pick_folder(&self, _title: &str, _start_dir: Option<&Utf8Path>) -> Result<String, DialogError> {
        Err(DialogError::Unavailable(self.capability()))
    }
}

/// Capability-keyed front door to the native folder pickers.
///
/// Detection runs at most once; later calls reuse its result.
pub struct NativeDialogAdapter {
    backends: Vec<Box<dyn DialogBackend>>,
    detected: OnceLock<BTreeMap<DialogCapability, usize>>,
    title: String,
    start_dir: Option<Utf8PathBuf>,
}

impl NativeDialogAdapter {
    /// Create an adapter over an explicit backend list.
    ///
    /// Earlier backends win when several provide the same capability.
    pub fn new(backends: Vec<Box<dyn DialogBackend>>, title: impl Into<String>) -> Self {
        Self {
            backends,
            detected: OnceLock::new(),
            title: title.into(),
            start_dir: None,
        }
    }

    /// All known tools, zenity preferred over kdialog on Linux.
    pub fn with_platform_defaults(title: impl Into<String>) -> Self {
        let backends: Vec<Box<dyn DialogBackend>> = vec![
            Box::new(ZenityDialog::new()),
            Box::new(KDialog::new()),
            Box::new(OsaScriptDialog::new()),
            Box::new(WindowsDialog),
        ];

        let start_dir = dirs::home_dir().and_then(|home| Utf8PathBuf::from_path_buf(home).ok());

        let mut adapter = Self::new(backends, title);
        adapter.start_dir = start_dir;
        adapter
    }

    /// Directory the pickers open in.
    pub fn with_start_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.start_dir = Some(dir.into());
        self
    }

    fn detect(&self) -> &BTreeMap<DialogCapability, usize> {
        self.detected.get_or_init(|| {
            let mut found = BTreeMap::new();
            for (index, backend) in self.backends.iter().enumerate() {
                if backend.is_available() {
                    tracing::info!(
                        "Folder picker available: {} ({})",
                        backend.tool_name(),
                        backend.capability()
                    );
                    found.entry(backend.capability()).or_insert(index);
                } else {
                    tracing::debug!("Folder picker not found: {}", backend.tool_name());
                }
            }

            if found.is_empty() {
                tracing::info!("No native folder picker found, manual folder entry only");
            }
            found
        })
    }

    /// Capabilities whose tool was found. Idempotent.
    pub fn detect_capabilities(&self) -> BTreeSet<DialogCapability> {
        self.detect().keys().copied().collect()
    }

    /// This platform's capability when available, else any available one.
    pub fn preferred_capability(&self) -> Option<DialogCapability> {
        let detected = self.detect();
        DialogCapability::for_current_platform()
            .filter(|cap| detected.contains_key(cap))
            .or_else(|| detected.keys().next().copied())
    }

    /// Open the folder picker for `capability` and block until it closes.
    ///
    /// Returns the raw path chosen by the user.
    pub fn open_folder_dialog(&self, capability: DialogCapability) -> Result<String, DialogError> {
        let index = *self
            .detect()
            .get(&capability)
            .ok_or(DialogError::Unavailable(capability))?;
        let backend = &self.backends[index];

        tracing::info!("Opening {} folder picker", backend.tool_name());
        let result = backend.pick_folder(&self.title, self.start_dir.as_deref());

        match &result {
            Ok(path) => tracing::info!("Folder picked: {}", path),
            Err(DialogError::Cancelled) => tracing::info!("Folder picker dismissed"),
            Err(e) => tracing::warn!("Folder picker failed: {}", e),
        }
        result
    }
}
