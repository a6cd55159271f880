//! Helper scripts written into the shared directory
//!
//! Both are plain bash. The picker script writes its outcome to
//! `selectedFile.txt` (paths, one per line, or `-1` on cancel) through a
//! temporary file and a rename so the host never sees a half-written result.
//! The console script tails `console.ansi` in a terminal and rewrites
//! `console.heartbeat` until `console.exit` appears or the terminal dies.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sentinel::{CONSOLE_ANSI, CONSOLE_EXIT, CONSOLE_HEARTBEAT, SELECTED_FILE};

pub const PICKER_SCRIPT: &str = "openPicker.sh";
pub const CONSOLE_SCRIPT: &str = "openConsole.sh";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn picker_script() -> String {
    format!(
        r#"#!/bin/bash
# usage: openPicker.sh <start-path> <title> <single|multi|dir|save|browse> [description|ext1 ext2 ...]...

DIR="$(cd "$(dirname "${{BASH_SOURCE[0]}}")" && pwd)"
RESULT_FILE="$DIR/{selected}"
START="${{1:-$HOME}}"
TITLE="${{2:-Select a file}}"
MODE="${{3:-single}}"
shift 3 2>/dev/null
FILTERS=("$@")

finish() {{
    printf '%s\n' "$1" > "$RESULT_FILE.tmp"
    mv -f "$RESULT_FILE.tmp" "$RESULT_FILE"
    exit 0
}}

pick_toolkit() {{
    case "${{XDG_CURRENT_DESKTOP:-}}" in
        *KDE*) command -v kdialog >/dev/null && {{ echo kdialog; return; }} ;;
        *GNOME*|*XFCE*|*Cinnamon*|*MATE*) command -v zenity >/dev/null && {{ echo zenity; return; }} ;;
    esac
    for tool in zenity kdialog yad; do
        command -v "$tool" >/dev/null && {{ echo "$tool"; return; }}
    done
    echo none
}}

if [ "$MODE" = "browse" ]; then
    xdg-open "$START" >/dev/null 2>&1 &
    finish "-1"
fi

TOOL="$(pick_toolkit)"
ARGS=()

case "$TOOL" in
    zenity|yad)
        if [ "$TOOL" = "zenity" ]; then ARGS+=(--file-selection); else ARGS+=(--file); fi
        ARGS+=(--title "$TITLE" --filename "$START/")
        case "$MODE" in
            multi) ARGS+=(--multiple --separator=$'\n') ;;
            dir) ARGS+=(--directory) ;;
            save) ARGS+=(--save) ;;
        esac
        for f in "${{FILTERS[@]}}"; do
            ARGS+=(--file-filter "${{f%%|*}} | ${{f#*|}}")
        done
        ;;
    kdialog)
        FILTER=""
        for f in "${{FILTERS[@]}}"; do
            [ -n "$FILTER" ] && FILTER+=$'\n'
            FILTER+="${{f#*|}}|${{f%%|*}}"
        done
        case "$MODE" in
            multi) ARGS+=(--getopenfilename "$START" "$FILTER" --multiple --separate-output) ;;
            dir) ARGS+=(--getexistingdirectory "$START") ;;
            save) ARGS+=(--getsavefilename "$START" "$FILTER") ;;
            *) ARGS+=(--getopenfilename "$START" "$FILTER") ;;
        esac
        ARGS+=(--title "$TITLE")
        ;;
    *)
        xdg-open "$START" >/dev/null 2>&1 &
        finish "-1"
        ;;
esac

if OUTPUT="$("$TOOL" "${{ARGS[@]}}" 2>/dev/null)" && [ -n "$OUTPUT" ]; then
    finish "$OUTPUT"
fi
finish "-1"
"#,
        selected = SELECTED_FILE,
    )
}

pub fn console_script() -> String {
    format!(
        r#"#!/bin/bash
# usage: openConsole.sh <shared-dir> [font-size] [#fg] [#bg]

SHARED_DIR="${{1}}"
FONT_SIZE="${{2:-10}}"
FG_COLOR="${{3:-#ffffff}}"
BG_COLOR="${{4:-#000000}}"

CONSOLE_FILE="$SHARED_DIR/{ansi}"
HEARTBEAT_FILE="$SHARED_DIR/{heartbeat}"
EXIT_FILE="$SHARED_DIR/{exit}"

xterm \
  -fa "Monospace" \
  -bg "$BG_COLOR" \
  -fg "$FG_COLOR" \
  -T "Sandbox Bridge" \
  -fs "$FONT_SIZE" \
  -xrm "XTerm*VT100.Translations: #override Ctrl Shift <Key>C: copy-selection(CLIPBOARD)" \
  -e tail -F "$CONSOLE_FILE" &

TERM_PID=$!

while [ ! -f "$EXIT_FILE" ]; do
    if ! kill -0 "$TERM_PID" 2>/dev/null; then
        break
    fi

    date +%s%3N > "$HEARTBEAT_FILE"
    sleep 0.016667
done

kill "$TERM_PID" 2>/dev/null
rm -f "$EXIT_FILE"
"#,
        ansi = CONSOLE_ANSI,
        heartbeat = CONSOLE_HEARTBEAT,
        exit = CONSOLE_EXIT,
    )
}

/// Write an executable script into `directory`
pub fn install(directory: &Path, name: &str, contents: &str) -> Result<PathBuf, ScriptError> {
    let path = directory.join(name);
    let io_err = |source| ScriptError::Io { path: path.clone(), source };

    std::fs::write(&path, contents).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).map_err(io_err)?;
    }

    tracing::debug!(path = %path.display(), "Installed helper script");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_picker_script_writes_result_sentinel() {
        let script = picker_script();
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("RESULT_FILE=\"$DIR/selectedFile.txt\""));
        assert!(script.contains("finish \"-1\""));
        for tool in ["zenity", "kdialog", "yad", "xdg-open"] {
            assert!(script.contains(tool), "missing {tool}");
        }
        // format! escaping leaves single braces for bash
        assert!(script.contains("${BASH_SOURCE[0]}"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn test_console_script_references_shared_files() {
        let script = console_script();
        assert!(script.contains("CONSOLE_FILE=\"$SHARED_DIR/console.ansi\""));
        assert!(script.contains("HEARTBEAT_FILE=\"$SHARED_DIR/console.heartbeat\""));
        assert!(script.contains("EXIT_FILE=\"$SHARED_DIR/console.exit\""));
        assert!(script.contains("date +%s%3N > \"$HEARTBEAT_FILE\""));
        assert!(!script.contains("}}"));
    }

    #[test]
    fn test_install_writes_executable() {
        let dir = TempDir::new().unwrap();
        let path = install(dir.path(), PICKER_SCRIPT, &picker_script()).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), picker_script());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_install_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = install(&dir.path().join("missing"), CONSOLE_SCRIPT, "x");
        assert!(matches!(result, Err(ScriptError::Io { .. })));
    }
}
