//! Scratch-space cleanup (§6.5): `temp_path/{uuid}/` directories older
//! than 7 days are removed once an hour by a local worker, so scratch
//! space left behind by module executions does not grow unbounded.

use std::path::Path;
use std::time::{Duration, SystemTime};

const MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run(temp_path: String) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = sweep(Path::new(&temp_path)).await {
            log::warn!("[CLEANER] sweep of {temp_path} failed: {e}");
        }
    }
}

async fn sweep(temp_path: &Path) -> std::io::Result<()> {
    let mut entries = match tokio::fs::read_dir(temp_path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let now = SystemTime::now();
    let mut removed = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_dir() {
            continue;
        }
        if is_stale(meta.modified()?, now) {
            tokio::fs::remove_dir_all(entry.path()).await?;
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("[CLEANER] removed {removed} scratch directories older than 7 days");
    }
    Ok(())
}

fn is_stale(modified: SystemTime, now: SystemTime) -> bool {
    now.duration_since(modified).unwrap_or_default() > MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_directory_is_not_stale() {
        let now = SystemTime::now();
        let modified = now - Duration::from_secs(3600);
        assert!(!is_stale(modified, now));
    }

    #[test]
    fn directory_older_than_seven_days_is_stale() {
        let now = SystemTime::now();
        let modified = now - (MAX_AGE + Duration::from_secs(1));
        assert!(is_stale(modified, now));
    }

    #[test]
    fn directory_exactly_at_max_age_is_not_yet_stale() {
        let now = SystemTime::now();
        let modified = now - MAX_AGE;
        assert!(!is_stale(modified, now));
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_directories_in_place() {
        let root = std::env::temp_dir().join(format!("fame-cleaner-test-{}", uuid::Uuid::new_v4()));
        let fresh = root.join("fresh");
        tokio::fs::create_dir_all(&fresh).await.unwrap();

        sweep(&root).await.unwrap();
        assert!(fresh.exists());

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn sweep_on_missing_directory_is_a_no_op() {
        let root = std::env::temp_dir().join(format!("fame-cleaner-missing-{}", uuid::Uuid::new_v4()));
        assert!(sweep(&root).await.is_ok());
    }
}
