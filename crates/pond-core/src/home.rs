use std::path::PathBuf;

/// Returns the pond home directory.
/// Resolution: $POND_HOME > $HOME/.pond > %USERPROFILE%\.pond > .pond
pub fn pond_home() -> PathBuf {
    if let Ok(p) = std::env::var("POND_HOME") {
        return PathBuf::from(p);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".pond");
    }
    PathBuf::from(".pond")
}
