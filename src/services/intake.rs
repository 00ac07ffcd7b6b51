use std::path::{Path, PathBuf};

use crate::config::LimitsConfig;
use crate::error::{IntakeError, IntakeResult};
use crate::models::{Job, Owner};
use crate::services::quota;
use crate::services::state::AppState;
use crate::services::text_extraction::DocumentFormat;

#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn read(path: &Path) -> IntakeResult<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        Ok(IncomingFile {
            file_name,
            bytes: std::fs::read(path)?,
        })
    }
}

/// Size, extension and content sniffing for one upload.
pub fn check_file(limits: &LimitsConfig, file: &IncomingFile) -> IntakeResult<()> {
    let size = file.bytes.len() as u64;
    if size > limits.max_file_bytes {
        return Err(IntakeError::FileTooLarge {
            filename: file.file_name.clone(),
            size,
            max: limits.max_file_bytes,
        });
    }

    let extension = Path::new(&file.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !limits.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&extension)) {
        return Err(IntakeError::InvalidFormat {
            filename: file.file_name.clone(),
            reason: format!("extension .{extension} is not accepted"),
        });
    }
    if DocumentFormat::detect(&file.bytes).is_none() {
        return Err(IntakeError::InvalidFormat {
            filename: file.file_name.clone(),
            reason: "content is not a PDF, PNG, JPEG or TIFF document".to_string(),
        });
    }
    Ok(())
}

/// Keeps letters, digits, dot, dash and underscore; drops any directory part.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

/// Checks all files and the owner's quota, then stores the files and creates
/// the job. Nothing is stored when any check fails.
pub fn create_job(state: &AppState, owner: &Owner, files: Vec<IncomingFile>) -> IntakeResult<Job> {
    let limits = &state.config.limits;
    if files.is_empty() {
        return Err(IntakeError::Validation("No files uploaded".to_string()));
    }
    if files.len() > limits.max_files_per_upload {
        return Err(IntakeError::Validation(format!(
            "At most {} files per upload, got {}",
            limits.max_files_per_upload,
            files.len()
        )));
    }
    for file in &files {
        check_file(limits, file)?;
    }

    let job = {
        let db = state.db()?;
        quota::ensure_capacity(&db, &state.config.quota, owner, files.len() as u64)?;
        db.create_job(owner, files.len() as u32)?
    };

    let job_dir = state.config.server.upload_dir.join(&job.id);
    std::fs::create_dir_all(&job_dir)?;
    let mut stored: Vec<(String, PathBuf, u64)> = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let path = job_dir.join(format!("{:03}_{}", index + 1, sanitize_file_name(&file.file_name)));
        std::fs::write(&path, &file.bytes)?;
        stored.push((file.file_name.clone(), path, file.bytes.len() as u64));
    }

    let db = state.db()?;
    for (file_name, path, size) in &stored {
        db.add_job_file(&job.id, file_name, &path.to_string_lossy(), *size)?;
    }
    tracing::info!(job_id = %job.id, owner = %job.owner_key, files = stored.len(), "Job created");
    Ok(job)
}
