//! Screen capture through the platform's screenshot tools.
//!
//! No capture library is linked; instead the first available command-line
//! tool is used:
//! - a user-configured argv template (`{output}` = destination path)
//! - `screencapture` on macOS
//! - `grim`, `gnome-screenshot`, `scrot`, ImageMagick `import` on Linux
//! - PowerShell + System.Windows.Forms on Windows

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::collaborators::ScreenCapturer;
use std::path::Path;

const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Captures the screen by running an external command.
#[derive(Debug, Clone)]
pub struct CommandScreenCapturer {
    candidates: Vec<Vec<String>>,
}

impl CommandScreenCapturer {
    /// Use `custom` if given, else the platform defaults.
    pub fn new(custom: Option<Vec<String>>) -> Self {
        let candidates = match custom {
            Some(argv) if !argv.is_empty() => vec![argv],
            _ => platform_candidates(),
        };
        Self { candidates }
    }

    pub fn candidates(&self) -> &[Vec<String>] {
        &self.candidates
    }
}

impl Default for CommandScreenCapturer {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ScreenCapturer for CommandScreenCapturer {
    async fn capture(&self, dest: &Path) -> Result<()> {
        let dest_str = dest
            .to_str()
            .ok_or_else(|| anyhow!("Screenshot path is not valid UTF-8: {:?}", dest))?;

        let mut failures = Vec::new();
        for template in &self.candidates {
            let argv = expand_template(template, dest_str);
            let Some((program, args)) = argv.split_first() else {
                continue;
            };

            let output = match tokio::process::Command::new(program)
                .args(args)
                .output()
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    failures.push(format!("{}: {}", program, e));
                    continue;
                }
            };

            if output.status.success() && dest.exists() {
                tracing::debug!("Screen captured with {}", program);
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            failures.push(format!("{}: {}", program, stderr.trim()));
        }

        Err(anyhow!(
            "Screen capture failed ({})",
            if failures.is_empty() {
                "no capture command configured".to_string()
            } else {
                failures.join("; ")
            }
        ))
    }
}

/// Substitute the destination into an argv template. A template without
/// the placeholder gets the path appended as the last argument.
fn expand_template(template: &[String], dest: &str) -> Vec<String> {
    if template.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
        template
            .iter()
            .map(|a| a.replace(OUTPUT_PLACEHOLDER, dest))
            .collect()
    } else {
        let mut argv = template.to_vec();
        argv.push(dest.to_string());
        argv
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(target_os = "macos")]
fn platform_candidates() -> Vec<Vec<String>> {
    vec![argv(&["screencapture", "-x", "-t", "png", OUTPUT_PLACEHOLDER])]
}

#[cfg(windows)]
fn platform_candidates() -> Vec<Vec<String>> {
    let script = "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
        $b = [System.Windows.Forms.SystemInformation]::VirtualScreen; \
        $bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; \
        $g = [System.Drawing.Graphics]::FromImage($bmp); \
        $g.CopyFromScreen($b.Left, $b.Top, 0, 0, $bmp.Size); \
        $bmp.Save('{output}', [System.Drawing.Imaging.ImageFormat]::Png)";
    vec![argv(&["powershell", "-NoProfile", "-Command", script])]
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_candidates() -> Vec<Vec<String>> {
    vec![
        argv(&["grim", OUTPUT_PLACEHOLDER]),
        argv(&["gnome-screenshot", "-f", OUTPUT_PLACEHOLDER]),
        argv(&["scrot", "--overwrite", OUTPUT_PLACEHOLDER]),
        argv(&["import", "-window", "root", OUTPUT_PLACEHOLDER]),
    ]
}
