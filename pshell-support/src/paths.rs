use std::env;
use std::path::{Path, PathBuf};

/// Resolve the search order for a PSHELL config/startup/batch file: the
/// environment override directory, a compile-time default directory, then
/// the current working directory (spec.md §6.2, §6.3, §6.6).
pub fn candidate_dirs(env_var: &str, compile_time_default: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(3);

    if let Ok(dir) = env::var(env_var) {
        if !dir.is_empty() {
            dirs.push(PathBuf::from(dir));
        }
    }

    dirs.push(PathBuf::from(compile_time_default));

    if let Ok(cwd) = env::current_dir() {
        dirs.push(cwd);
    }

    dirs
}

/// Find the first existing `<dirs>/<filename>` in search order.
pub fn find_file(env_var: &str, compile_time_default: &str, filename: &str) -> Option<PathBuf> {
    candidate_dirs(env_var, compile_time_default)
        .into_iter()
        .map(|dir| dir.join(filename))
        .find(|path| path.is_file())
}

/// Well-known directory Unix-domain sockets live under (spec.md §6.5).
pub fn socket_dir() -> &'static Path {
    Path::new("/tmp/.pshell")
}
