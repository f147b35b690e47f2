//! Live preview playback through `ffplay`.
//!
//! The player owns one ffplay child process at a time. A watcher thread
//! reports unexpected exits through the failure callback; a stderr reader
//! keeps the last error line so the report says why playback stopped.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::FrameSourceInfo;
use crate::devices::InputFormat;
use crate::error::PlayerError;
use crate::platform::{FailureCallback, Player, PlayerFactory, PlayerOptions};

const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Creates [`FfplayPlayer`]s for the host's input format.
#[derive(Debug, Clone)]
pub struct FfplayPlayerFactory {
    ffplay: String,
    format: InputFormat,
    window_title: String,
}

impl FfplayPlayerFactory {
    pub fn new(ffplay: impl Into<String>) -> Self {
        Self {
            ffplay: ffplay.into(),
            format: InputFormat::host(),
            window_title: "camview".to_string(),
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_window_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = title.into();
        self
    }

    /// ffplay arguments for previewing `source` of `device_id`.
    pub fn ffplay_args(
        &self,
        device_id: &str,
        source: &FrameSourceInfo,
        options: PlayerOptions,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-window_title".into(),
            self.window_title.clone(),
            "-f".into(),
            self.format.ffmpeg_name().into(),
        ];
        if let Some(fps) = source.framerate {
            args.push("-framerate".into());
            args.push(fps.to_string());
        }
        if let Some(res) = source.resolution {
            args.push("-video_size".into());
            args.push(res.to_string());
        }
        if options.real_time {
            args.extend(
                ["-fflags", "nobuffer", "-flags", "low_delay", "-framedrop"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
        args.push("-i".into());
        args.push(self.format.input_spec(device_id));
        args
    }
}

impl PlayerFactory for FfplayPlayerFactory {
    fn create(
        &self,
        device_id: &str,
        source: &FrameSourceInfo,
        options: PlayerOptions,
        on_failure: FailureCallback,
    ) -> Result<Box<dyn Player>, PlayerError> {
        let mut player = FfplayPlayer::new(
            self.ffplay.clone(),
            self.ffplay_args(device_id, source, options),
            on_failure,
        );
        log::debug!("Bound player to {} source {}", device_id, source.id);
        if options.autoplay {
            player.play()?;
        }
        Ok(Box::new(player))
    }
}

/// A running ffplay process and its helper threads.
struct PlayerProcess {
    child: Arc<Mutex<Child>>,
    pid: u32,
    shutdown_flag: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
    stderr_thread: Option<JoinHandle<()>>,
}

impl PlayerProcess {
    fn spawn(
        program: &str,
        args: &[String],
        on_failure: FailureCallback,
    ) -> Result<Self, PlayerError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Own process group, so terminal Ctrl+C reaches only camview
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| PlayerError::from_spawn(program, e))?;

        let pid = child.id();
        let last_line = Arc::new(Mutex::new(None::<String>));

        let stderr_thread = child.stderr.take().map(|stderr| {
            let last_line = Arc::clone(&last_line);
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    log::debug!("[ffplay] {}", line);
                    if let Ok(mut last) = last_line.lock() {
                        *last = Some(line);
                    }
                }
            })
        });

        let child = Arc::new(Mutex::new(child));
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let watcher = {
            let child = Arc::clone(&child);
            let shutdown = Arc::clone(&shutdown_flag);
            thread::spawn(move || loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let status = match child.lock() {
                    Ok(mut c) => c.try_wait(),
                    Err(_) => break,
                };
                match status {
                    Ok(None) => thread::sleep(WATCH_INTERVAL),
                    Ok(Some(status)) => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        // Let the stderr reader drain the final message
                        thread::sleep(WATCH_INTERVAL);
                        let detail = last_line.lock().ok().and_then(|l| l.clone());
                        on_failure(exit_message(status.success(), status.code(), detail));
                        break;
                    }
                    Err(e) => {
                        on_failure(format!("lost track of preview process: {}", e));
                        break;
                    }
                }
            })
        };

        log::info!("Started preview process (pid {})", pid);
        Ok(Self {
            child,
            pid,
            shutdown_flag,
            watcher: Some(watcher),
            stderr_thread,
        })
    }

    /// Send `signal` to the process if it is still running.
    ///
    /// The child lock is held from the liveness check to the `kill(2)` so
    /// the watcher cannot reap the pid in between.
    ///
    /// # Returns
    /// `Ok(false)` when the process has already exited and nothing was sent.
    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) -> Result<bool, PlayerError> {
        let mut child = self.child.lock().map_err(|_| {
            PlayerError::Signal(std::io::Error::other("preview process lock poisoned"))
        })?;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(_)) => return Ok(false),
            Err(e) => return Err(PlayerError::Signal(e)),
        }

        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if rc == 0 {
            Ok(true)
        } else {
            Err(PlayerError::Signal(std::io::Error::last_os_error()))
        }
    }

    fn is_running(&self) -> bool {
        self.child
            .lock()
            .map(|mut c| matches!(c.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    /// Stop the process and join the helper threads.
    fn shutdown(mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Ok(mut child) = self.child.lock() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        if let Some(h) = self.watcher.take() {
            let _ = h.join();
        }
        if let Some(h) = self.stderr_thread.take() {
            let _ = h.join();
        }
        log::info!("Stopped preview process (pid {})", self.pid);
    }
}

fn exit_message(success: bool, code: Option<i32>, detail: Option<String>) -> String {
    match (success, detail) {
        (true, _) => "preview window was closed".to_string(),
        (false, Some(detail)) => detail,
        (false, None) => match code {
            Some(code) => format!("ffplay exited with code {}", code),
            None => "ffplay was terminated by a signal".to_string(),
        },
    }
}

/// ffplay-backed [`Player`].
///
/// Nothing is spawned until [`Player::play`]. On unix, pause suspends the
/// process with `SIGSTOP` and play resumes it; elsewhere pause ends the
/// process and play starts a fresh one.
pub struct FfplayPlayer {
    program: String,
    args: Vec<String>,
    on_failure: FailureCallback,
    process: Option<PlayerProcess>,
    paused: bool,
    disposed: bool,
}

impl std::fmt::Debug for FfplayPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfplayPlayer")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("paused", &self.paused)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl FfplayPlayer {
    pub fn new(program: String, args: Vec<String>, on_failure: FailureCallback) -> Self {
        Self {
            program,
            args,
            on_failure,
            process: None,
            paused: false,
            disposed: false,
        }
    }

    fn stop_process(&mut self) {
        if let Some(process) = self.process.take() {
            #[cfg(unix)]
            {
                if self.paused {
                    // Resume first so the kill is not left pending on a stopped process
                    let _ = process.signal(libc::SIGCONT);
                }
            }
            process.shutdown();
        }
        self.paused = false;
    }
}

impl Player for FfplayPlayer {
    fn play(&mut self) -> Result<(), PlayerError> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }

        #[cfg(unix)]
        {
            if self.paused {
                if let Some(process) = &self.process {
                    if process.signal(libc::SIGCONT)? {
                        self.paused = false;
                        return Ok(());
                    }
                }
            }
        }

        if self.process.as_ref().is_some_and(|p| p.is_running()) {
            return Ok(());
        }
        // Reap a process that exited on its own before starting another
        self.stop_process();

        self.process = Some(PlayerProcess::spawn(
            &self.program,
            &self.args,
            Arc::clone(&self.on_failure),
        )?);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        if self.disposed {
            return Err(PlayerError::Disposed);
        }
        if self.paused || self.process.is_none() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let stopped = match &self.process {
                Some(process) => process.signal(libc::SIGSTOP)?,
                None => false,
            };
            if stopped {
                self.paused = true;
            } else {
                // Already exited on its own
                self.stop_process();
            }
        }

        #[cfg(not(unix))]
        {
            self.stop_process();
        }

        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop_process();
        self.disposed = true;
    }

    fn is_playing(&self) -> bool {
        !self.disposed && !self.paused && self.process.as_ref().is_some_and(|p| p.is_running())
    }
}

impl Drop for FfplayPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}
