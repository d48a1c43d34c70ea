//! Serial console login automaton.
//!
//! Drives a getty-style login prompt into a logged-in shell, then prepares
//! the console for scripted use (wide terminal, quiet kernel log).

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use rtcheck_core::batch::{Batcher, Case, CaseAction};
use rtcheck_core::error::{CheckupError, CheckupResult};
use rtcheck_core::PROMPT;

use crate::session::{Console, ConsoleSession};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LOGGED_IN_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const LOGIN_RETRY_TIMEOUT: Duration = Duration::from_secs(60);
const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(30);
const CASE_RETRIES: u32 = 10;

/// Console user credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Where the login automaton stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    CheckingLoggedIn,
    AwaitingLoginPrompt,
    AwaitingPasswordPrompt,
    LoginIncorrect,
    LoggedIn,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CheckingLoggedIn => "checking-logged-in",
            Self::AwaitingLoginPrompt => "awaiting-login-prompt",
            Self::AwaitingPasswordPrompt => "awaiting-password-prompt",
            Self::LoginIncorrect => "login-incorrect",
            Self::LoggedIn => "logged-in",
        };
        f.write_str(s)
    }
}

/// Hosts a freshly booted guest may call itself.
fn host_alternatives(target_name: &str) -> String {
    format!("(localhost|centos|{})", regex::escape(target_name))
}

/// Pattern of the shell prompt shown once `username` is logged in.
pub fn logged_in_prompt(username: &str, target_name: &str) -> String {
    let hosts = host_alternatives(target_name);
    format!(
        r"(\[{}@{hosts} ~\]\$ |\[root@{hosts} ~\]# )",
        regex::escape(username)
    )
}

fn login_prompt(target_name: &str) -> String {
    format!("{} login: ", host_alternatives(target_name))
}

/// Pattern matching the output of `echo $?` for the given exit value.
fn ret_value(value: &str) -> String {
    format!(r"\n{}\r\n(?-u:.)*{PROMPT}", regex::escape(value))
}

fn login_cases(creds: &Credentials, target_name: &str) -> Vec<Case> {
    vec![
        Case::new(login_prompt(target_name), CaseAction::Next)
            .with_send(format!("{}\n", creds.username))
            .with_retries(CASE_RETRIES)
            .with_label(LoginState::AwaitingPasswordPrompt.to_string()),
        Case::new("Password:", CaseAction::Next)
            .with_send(format!("{}\n", creds.password))
            .with_retries(CASE_RETRIES)
            .with_label(LoginState::CheckingLoggedIn.to_string()),
        Case::new(
            "Login incorrect",
            CaseAction::Fail(format!("failed to login as {:?}: login incorrect", creds.username)),
        )
        .with_retries(CASE_RETRIES)
        .with_label(LoginState::LoginIncorrect.to_string()),
        Case::new(logged_in_prompt(&creds.username, target_name), CaseAction::Succeed)
            .with_retries(CASE_RETRIES)
            .with_label(LoginState::LoggedIn.to_string()),
    ]
}

/// Log into the console of the session's target.
pub async fn login(session: &ConsoleSession, creds: &Credentials) -> CheckupResult<()> {
    let mut console = session.spawn(CONNECT_TIMEOUT).await?;
    let res = drive(&mut console, creds).await;
    console.close().await;
    res
}

async fn drive(console: &mut Console, creds: &Credentials) -> CheckupResult<()> {
    let target = console.target().clone();
    let prompt = logged_in_prompt(&creds.username, &target.name);

    console.send("\n").await?;

    debug!(target = %target, state = %LoginState::CheckingLoggedIn, "checking for a shell prompt");
    let check = [Batcher::send("\n"), Batcher::expect(prompt)];
    match console.expect_batch(&check, LOGGED_IN_CHECK_TIMEOUT).await {
        Ok(_) => {
            info!(target = %target, state = %LoginState::LoggedIn, "already logged in");
            return Ok(());
        }
        Err(e) => debug!(target = %target, error = %e.error, "not logged in yet"),
    }

    debug!(target = %target, state = %LoginState::AwaitingLoginPrompt, "logging in");
    let batch = [
        Batcher::send("\n"),
        Batcher::send("\n"),
        Batcher::SwitchCase(login_cases(creds, &target.name)),
    ];
    if let Err(first) = console.expect_batch(&batch, LOGIN_TIMEOUT).await {
        if first.error.is_permission_denied() {
            warn!(target = %target, state = %LoginState::LoginIncorrect, "login rejected");
            return Err(first.error);
        }
        if !retryable(&first.error) {
            return Err(first.error);
        }
        // Asynchronous kernel messages can tear the prompt apart.
        warn!(target = %target, partial = ?first.partial, error = %first.error, "login attempt failed, retrying once");
        if let Err(second) = console.expect_batch(&batch, LOGIN_RETRY_TIMEOUT).await {
            if second.error.is_permission_denied() {
                warn!(target = %target, state = %LoginState::LoginIncorrect, "login rejected");
            }
            return Err(second.error);
        }
    }

    info!(target = %target, state = %LoginState::LoggedIn, "logged in");
    configure_console(console, &creds.username).await
}

fn retryable(err: &CheckupError) -> bool {
    err.is_timeout() || matches!(err.root(), CheckupError::RetriesExhausted(_))
}

/// Widen the terminal and silence kernel messages on a logged-in console.
pub async fn configure_console(console: &mut Console, username: &str) -> CheckupResult<()> {
    let sudo = if username == "root" { "" } else { "sudo " };
    let batch = [
        Batcher::send("stty cols 500 rows 500\n"),
        Batcher::expect(PROMPT),
        Batcher::send("echo $?\n"),
        Batcher::expect(ret_value("0")),
        Batcher::send(format!("{sudo}dmesg -n 1\n")),
        Batcher::expect(PROMPT),
        Batcher::send("echo $?\n"),
        Batcher::expect(ret_value("0")),
    ];
    console
        .expect_batch(&batch, CONFIGURE_TIMEOUT)
        .await
        .map(|_| ())
        .map_err(|e| CheckupError::from(e).context("failed to configure console"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use rtcheck_core::transport::{ConsoleStream, IoConsoleStream, StreamFactory, TargetId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::time::Instant;

    #[derive(Clone, Copy)]
    enum Guest {
        Booted,
        LoggedIn,
    }

    /// A guest with a getty on its serial console. A nonzero `boot` keeps the
    /// console silent for that long, then the getty prints its prompt.
    async fn guest(remote: DuplexStream, start: Guest, password: &'static str, boot: Duration) {
        let (rx, mut tx) = tokio::io::split(remote);
        let mut lines = BufReader::new(rx).lines();
        let mut shell = matches!(start, Guest::LoggedIn);
        let mut prompted = false;
        let mut user: Option<String> = None;

        if !boot.is_zero() {
            tokio::time::sleep(boot).await;
            if tx.write_all(b"\r\nvm login: ").await.is_err() {
                return;
            }
            prompted = true;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let out = if shell {
                let reply = if line == "echo $?" { "0\r\n" } else { "" };
                format!("{line}\r\n{reply}[root@vm ~]# ")
            } else if let Some(name) = user.take() {
                if name == "root" && line == password {
                    shell = true;
                    "\r\n[root@vm ~]# ".to_string()
                } else {
                    "\r\nLogin incorrect\r\n\r\nvm login: ".to_string()
                }
            } else if line.is_empty() {
                if prompted {
                    continue;
                }
                prompted = true;
                "\r\nvm login: ".to_string()
            } else {
                user = Some(line.clone());
                format!("{line}\r\nPassword: ")
            };
            if tx.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    struct GuestFactory {
        start: Guest,
        password: &'static str,
        boot: Duration,
    }

    impl StreamFactory for GuestFactory {
        fn open<'a>(
            &'a self,
            _target: &'a TargetId,
            _timeout: Duration,
        ) -> BoxFuture<'a, CheckupResult<Box<dyn ConsoleStream>>> {
            Box::pin(async move {
                let (local, remote) = tokio::io::duplex(4096);
                tokio::spawn(guest(remote, self.start, self.password, self.boot));
                Ok(Box::new(IoConsoleStream::new(local)) as Box<dyn ConsoleStream>)
            })
        }
    }

    fn session(start: Guest, password: &'static str) -> ConsoleSession {
        booting_session(start, password, Duration::ZERO)
    }

    fn booting_session(start: Guest, password: &'static str, boot: Duration) -> ConsoleSession {
        ConsoleSession::new(
            Arc::new(GuestFactory {
                start,
                password,
                boot,
            }),
            TargetId::new("ns", "vm"),
        )
    }

    #[test]
    fn prompt_patterns() {
        let re = regex::Regex::new(&logged_in_prompt("cloud-user", "vm.1")).unwrap();
        assert!(re.is_match("[cloud-user@vm.1 ~]$ "));
        assert!(re.is_match("[root@localhost ~]# "));
        assert!(!re.is_match("[cloud-user@vmx1 ~]$ "));

        let re = regex::Regex::new(&login_prompt("vm")).unwrap();
        assert!(re.is_match("centos login: "));
        assert!(re.is_match("vm login: "));
    }

    #[test]
    fn cases_are_labelled_with_the_state_they_enter() {
        let cases = login_cases(&Credentials::new("root", "redhat"), "vm");
        let labels: Vec<_> = cases.iter().map(|case| case.label.as_deref()).collect();
        assert_eq!(
            labels,
            vec![
                Some("awaiting-password-prompt"),
                Some("checking-logged-in"),
                Some("login-incorrect"),
                Some("logged-in"),
            ]
        );
        assert_eq!(cases[0].send.as_deref(), Some("root\n"));
        assert_eq!(cases[1].send.as_deref(), Some("redhat\n"));
    }

    #[test]
    fn ret_value_requires_exact_code() {
        let re = regex::bytes::Regex::new(&ret_value("0")).unwrap();
        assert!(re.is_match(b"echo $?\r\n0\r\n[root@vm ~]# "));
        assert!(re.is_match(b"echo $?\r\n0\r\n\x1b\xff[root@vm ~]# "));
        assert!(!re.is_match(b"echo $?\r\n10\r\n[root@vm ~]# "));
    }

    #[tokio::test(start_paused = true)]
    async fn logs_in_from_getty() {
        let session = session(Guest::Booted, "redhat");
        login(&session, &Credentials::new("root", "redhat")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn already_logged_in_skips_credentials() {
        let session = session(Guest::LoggedIn, "unused");
        login(&session, &Credentials::new("root", "redhat")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_password_is_permission_denied() {
        let session = session(Guest::Booted, "redhat");
        let err = login(&session, &Credentials::new("root", "wrong"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn late_getty_is_caught_by_the_retry() {
        // The prompt shows up after the first attempt has given up.
        let boot = LOGIN_TIMEOUT + Duration::from_secs(10);
        let session = booting_session(Guest::Booted, "redhat", boot);
        let started = Instant::now();
        login(&session, &Credentials::new("root", "redhat")).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= boot, "{elapsed:?}");
        assert!(elapsed < LOGGED_IN_CHECK_TIMEOUT + LOGIN_TIMEOUT + LOGIN_RETRY_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_console_retries_once_then_times_out() {
        /// Swallows console input, counting the newlines it receives.
        struct Silent {
            newlines: Arc<AtomicUsize>,
        }

        impl StreamFactory for Silent {
            fn open<'a>(
                &'a self,
                _target: &'a TargetId,
                _timeout: Duration,
            ) -> BoxFuture<'a, CheckupResult<Box<dyn ConsoleStream>>> {
                let newlines = self.newlines.clone();
                Box::pin(async move {
                    let (local, mut remote) = tokio::io::duplex(4096);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 256];
                        while let Ok(n) = remote.read(&mut buf).await {
                            if n == 0 {
                                break;
                            }
                            let count = buf[..n].iter().filter(|b| **b == b'\n').count();
                            newlines.fetch_add(count, Ordering::SeqCst);
                        }
                    });
                    Ok(Box::new(IoConsoleStream::new(local)) as Box<dyn ConsoleStream>)
                })
            }
        }

        let newlines = Arc::new(AtomicUsize::new(0));
        let session = ConsoleSession::new(
            Arc::new(Silent {
                newlines: newlines.clone(),
            }),
            TargetId::new("ns", "vm"),
        );
        let started = Instant::now();
        let err = login(&session, &Credentials::new("root", "redhat"))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            matches!(err.root(), CheckupError::Timeout { after, .. } if *after == LOGIN_RETRY_TIMEOUT),
            "{err}"
        );
        let attempts = LOGGED_IN_CHECK_TIMEOUT + LOGIN_TIMEOUT + LOGIN_RETRY_TIMEOUT;
        assert!(elapsed >= attempts, "{elapsed:?}");
        assert!(elapsed <= attempts + Duration::from_secs(1), "{elapsed:?}");

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Wake-up, logged-in check, then two per login attempt: no third attempt.
        assert_eq!(newlines.load(Ordering::SeqCst), 6);
    }
}
