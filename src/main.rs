//! Command-line client for the Doppelganger admin WebSocket
//!
//! Run with: cargo run --features cli --bin doppel-cli -- --host 192.168.4.1 watch

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use clap::{Parser, Subcommand, ValueEnum};
    use doppel_admin::core::{
        settings_reply_message, CardTable, Column, DebugForm, FirmwareInfo, GpioForm, InboundEvent,
        LinkConfig, MaintenanceAction, NetworkInfo, NotificationsForm, PaxtonResetForm, ReaderForm,
        ResetCardForm, Source, Submission, ValidationErrors, CARDS_CSV_PATH,
    };
    use doppel_admin::websocket_native::NativeClient;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::process::ExitCode;
    use std::rc::Rc;
    use std::time::Duration;
    use tracing::{info, warn};

    #[derive(Parser)]
    #[command(
        name = "doppel-cli",
        about = "Configure a Doppelganger card-reader controller over its WebSocket"
    )]
    struct Cli {
        /// Full WebSocket URL of the device (overrides --host)
        #[arg(long, env = "DOPPEL_WS", global = true)]
        url: Option<String>,

        /// Device host name or address
        #[arg(long, default_value = "192.168.4.1", global = true)]
        host: String,

        /// Seconds to wait for the connection and for replies
        #[arg(long, default_value_t = 5, global = true)]
        timeout: u64,

        #[command(subcommand)]
        command: Cmd,
    }

    #[derive(Subcommand)]
    enum Cmd {
        /// Print every routed message until interrupted
        Watch,
        /// Toggle serial debug output (the device reboots)
        Debug {
            #[arg(value_enum)]
            state: Toggle,
        },
        /// Configure the GPIO 35/36 pulse outputs
        Gpio {
            #[arg(long, value_enum, default_value = "disabled")]
            pin35: PinStatus,
            #[arg(long, default_value = "1000")]
            pin35_duration: String,
            #[arg(long, value_enum, default_value = "disabled")]
            pin36: PinStatus,
            #[arg(long, default_value = "1000")]
            pin36_duration: String,
        },
        /// Configure email notifications
        Notifications {
            /// Turn notifications off; SMTP settings are replaced by placeholders
            #[arg(long)]
            disable: bool,
            #[arg(long, default_value = "")]
            smtp_host: String,
            #[arg(long, default_value = "465")]
            smtp_port: String,
            #[arg(long, default_value = "")]
            smtp_user: String,
            #[arg(long, env = "DOPPEL_SMTP_PASS", default_value = "", hide_env_values = true)]
            smtp_pass: String,
            #[arg(long, default_value = "")]
            smtp_recipient: String,
        },
        /// Set the reset card template
        ResetCard {
            bit_length: String,
            facility_code: String,
            card_number: String,
        },
        /// Set the Paxton reset card value (10 hex digits)
        Paxton { hex: String },
        /// Select the reader protocol (HID or PAXTON)
        Reader { reader_type: String },
        /// Wipe or restore device state
        Maintenance {
            #[arg(value_enum)]
            action: MaintenanceArg,
            /// Confirm the action
            #[arg(long)]
            yes: bool,
        },
        /// Render a downloaded cards.csv
        Cards {
            #[arg(default_value = CARDS_CSV_PATH)]
            file: PathBuf,
            /// Column header to click (BL, FC or CN); repeat to toggle again
            #[arg(long)]
            sort: Vec<String>,
        },
        /// Summarize saved `/network` and `/firmware` responses
        Status {
            #[arg(long, default_value = "network.json")]
            network: PathBuf,
            #[arg(long, default_value = "firmware.json")]
            firmware: PathBuf,
        },
    }

    #[derive(Clone, Copy, ValueEnum)]
    enum Toggle {
        On,
        Off,
    }

    #[derive(Clone, Copy, ValueEnum)]
    enum PinStatus {
        Enabled,
        Disabled,
    }

    impl PinStatus {
        fn as_str(self) -> &'static str {
            match self {
                PinStatus::Enabled => "enabled",
                PinStatus::Disabled => "disabled",
            }
        }
    }

    #[derive(Clone, Copy, ValueEnum)]
    enum MaintenanceArg {
        WipeCards,
        RestoreResetCard,
        RestoreNotifications,
        ResetGpio,
        ResetWireless,
        ResetDevice,
    }

    impl From<MaintenanceArg> for MaintenanceAction {
        fn from(arg: MaintenanceArg) -> Self {
            match arg {
                MaintenanceArg::WipeCards => MaintenanceAction::WipeCards,
                MaintenanceArg::RestoreResetCard => MaintenanceAction::RestoreResetCard,
                MaintenanceArg::RestoreNotifications => MaintenanceAction::RestoreNotifications,
                MaintenanceArg::ResetGpio => MaintenanceAction::ResetGpio,
                MaintenanceArg::ResetWireless => MaintenanceAction::ResetWireless,
                MaintenanceArg::ResetDevice => MaintenanceAction::ResetDevice,
            }
        }
    }

    type Describe = Box<dyn Fn(&InboundEvent) -> String>;

    pub async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
        let cli = Cli::parse();
        let config = match &cli.url {
            Some(url) => LinkConfig::new(url.clone()),
            None => LinkConfig::for_host(&cli.host),
        };
        let wait = Duration::from_secs(cli.timeout);

        let form: Result<(Submission, Describe), ValidationErrors> = match cli.command {
            Cmd::Watch => return watch(config).await,
            Cmd::Cards { file, sort } => return render_cards(&file, &sort),
            Cmd::Status { network, firmware } => return render_status(&network, &firmware),
            Cmd::Debug { state } => Ok((
                DebugForm {
                    enable: matches!(state, Toggle::On),
                }
                .submit(),
                settings_describe(),
            )),
            Cmd::Gpio {
                pin35,
                pin35_duration,
                pin36,
                pin36_duration,
            } => GpioForm {
                pin35_status: pin35.as_str().to_string(),
                pin35_pulse_duration: pin35_duration,
                pin36_status: pin36.as_str().to_string(),
                pin36_pulse_duration: pin36_duration,
            }
            .submit()
            .map(|s| (s, settings_describe())),
            Cmd::Notifications {
                disable,
                smtp_host,
                smtp_port,
                smtp_user,
                smtp_pass,
                smtp_recipient,
            } => Ok((
                NotificationsForm {
                    enable_email: (!disable).to_string(),
                    smtp_host,
                    smtp_port,
                    smtp_user,
                    smtp_pass,
                    smtp_recipient,
                }
                .submit(),
                settings_describe(),
            )),
            Cmd::ResetCard {
                bit_length,
                facility_code,
                card_number,
            } => ResetCardForm {
                bit_length,
                facility_code,
                card_number,
            }
            .submit()
            .map(|s| (s, settings_describe())),
            Cmd::Paxton { hex } => PaxtonResetForm { hex }
                .submit()
                .map(|s| (s, settings_describe())),
            Cmd::Reader { reader_type } => ReaderForm { reader_type }
                .submit()
                .map(|s| (s, settings_describe())),
            Cmd::Maintenance { action, yes } => {
                let action = MaintenanceAction::from(action);
                if !yes {
                    eprintln!("{}", action.confirmation_prompt());
                    eprintln!("Re-run with --yes to confirm.");
                    return Ok(ExitCode::FAILURE);
                }
                let describe: Describe =
                    Box::new(move |event| action.reply_message(event.is_success()).to_string());
                Ok((action.submit(), describe))
            }
        };

        match form {
            Ok((submission, describe)) => submit(config, submission, describe, wait).await,
            Err(errors) => {
                eprintln!("{errors}");
                Ok(ExitCode::from(2))
            }
        }
    }

    fn settings_describe() -> Describe {
        Box::new(|event| {
            settings_reply_message(event)
                .map(str::to_string)
                .unwrap_or_else(|| event.body.to_string())
        })
    }

    async fn submit(
        config: LinkConfig,
        submission: Submission,
        describe: Describe,
        wait: Duration,
    ) -> Result<ExitCode, Box<dyn std::error::Error>> {
        let mut client = NativeClient::new(config);
        let reply: Rc<RefCell<Option<(bool, String)>>> = Rc::new(RefCell::new(None));

        let reply_source = submission.command.reply_source();
        if let Some(source) = reply_source {
            let slot = reply.clone();
            client
                .dispatcher_mut()
                .register_handler(source, move |event| {
                    *slot.borrow_mut() = Some((event.is_success(), describe(event)));
                    Ok(())
                });
        }

        client.wait_open(wait).await?;
        client.dispatcher_mut().send(&submission.command)?;
        info!(command = submission.command.name(), "Command sent");
        println!("{}", submission.confirmation);

        let Some(source) = reply_source else {
            return Ok(ExitCode::SUCCESS);
        };

        let waited = tokio::time::timeout(wait, async {
            while reply.borrow().is_none() {
                if client.next().await.is_none() {
                    break;
                }
            }
        })
        .await;

        let outcome = reply.borrow_mut().take();
        match (waited, outcome) {
            (_, Some((success, message))) => {
                println!("{message}");
                Ok(if success {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            _ => {
                warn!(%source, "No routed reply from device");
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    async fn watch(config: LinkConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
        let mut client = NativeClient::new(config);
        let received = Rc::new(RefCell::new(0u64));

        for &source in Source::ALL {
            let received = received.clone();
            client
                .dispatcher_mut()
                .register_handler(source, move |event| {
                    *received.borrow_mut() += 1;
                    println!("[{}] {}", event.source, event.body);
                    Ok(())
                });
        }

        client.dispatcher_mut().ensure_connection()?;
        info!("Watching device messages");

        let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                outcome = client.next() => {
                    if outcome.is_none() {
                        warn!("Event channel closed");
                        break;
                    }
                }
                _ = stats_interval.tick() => {
                    info!(
                        state = %client.dispatcher().state(),
                        messages = *received.borrow(),
                        "stats"
                    );
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn render_status(
        network: &Path,
        firmware: &Path,
    ) -> Result<ExitCode, Box<dyn std::error::Error>> {
        let network = NetworkInfo::parse(&std::fs::read_to_string(network)?)?;
        let firmware = FirmwareInfo::parse(&std::fs::read_to_string(firmware)?)?;

        println!("Device:     {}", firmware.device_label());
        println!("Firmware:   {}", firmware.version_label());
        println!("Build date: {}", firmware.build_date_label());
        println!("IP:         {}", network.ip_label());
        println!("Hostname:   {}", network.hostname_label());
        Ok(ExitCode::SUCCESS)
    }

    fn render_cards(
        file: &Path,
        sort: &[String],
    ) -> Result<ExitCode, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(file)?;
        let mut table = CardTable::parse(&text);

        for key in sort {
            let Some(column) = Column::from_key(key) else {
                eprintln!("Unknown column `{key}`, expected BL, FC or CN");
                return Ok(ExitCode::from(2));
            };
            table.toggle_sort(column);
        }

        println!("BL\tFC\tCN");
        for row in table.rows() {
            println!("{}\t{}\t{}", row.bit_length, row.facility_code, row.card_number);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> Result<std::process::ExitCode, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,doppel_admin=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
