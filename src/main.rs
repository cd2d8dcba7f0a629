use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use mpesa_relay::{
    ChannelConfig, CommandId, Config, ConnectionState, HttpGateway, NotificationChannel, Outcome,
    OutcomeResult, PaymentForm, ReconnectPolicy, Session, SessionEvent, SubmitError,
};
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Submit an M-Pesa payment and wait for its result notification.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the payment gateway API
    #[arg(long, env = "MPESA_GATEWAY_URL", default_value = Config::DEFAULT_GATEWAY_URL)]
    gateway_url: String,

    /// WebSocket endpoint delivering payment notifications
    #[arg(long, env = "MPESA_NOTIFY_URL", default_value = Config::DEFAULT_NOTIFICATION_URL)]
    notify_url: String,

    /// Merchant key sent with every payment request
    #[arg(long, env = "MPESA_MERCHANT_KEY")]
    merchant_key: String,

    /// Seconds between reconnect attempts
    #[arg(long, default_value_t = 3)]
    reconnect_secs: u64,

    /// Use exponential backoff (capped at 60s) instead of a fixed reconnect delay
    #[arg(long)]
    backoff: bool,

    /// Stop waiting for the result after this many seconds
    #[arg(long)]
    wait: Option<u64>,

    #[command(subcommand)]
    payment: Payment,
}

#[derive(Subcommand)]
enum Payment {
    /// Push a payment prompt to the payer's phone
    Stk {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        amount: u64,
        /// Alphanumeric, at most 12 characters
        #[arg(long)]
        account_reference: String,
        /// At most 13 characters
        #[arg(long, default_value = "Payment")]
        description: String,
    },
    /// Send money to a customer
    B2c {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        amount: u64,
        #[arg(long, value_enum, default_value_t = Command::BusinessPayment)]
        command: Command,
        #[arg(long, default_value = PaymentForm::DEFAULT_REMARKS)]
        remarks: String,
        #[arg(long)]
        occasion: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Command {
    SalaryPayment,
    BusinessPayment,
    PromotionPayment,
}

impl From<Command> for CommandId {
    fn from(command: Command) -> Self {
        match command {
            Command::SalaryPayment => CommandId::SalaryPayment,
            Command::BusinessPayment => CommandId::BusinessPayment,
            Command::PromotionPayment => CommandId::PromotionPayment,
        }
    }
}

impl From<Payment> for PaymentForm {
    fn from(payment: Payment) -> Self {
        match payment {
            Payment::Stk {
                phone,
                amount,
                account_reference,
                description,
            } => PaymentForm::StkPush {
                phone_number: phone,
                amount,
                account_reference,
                transaction_desc: description,
            },
            Payment::B2c {
                phone,
                amount,
                command,
                remarks,
                occasion,
            } => PaymentForm::Disbursement {
                phone_number: phone,
                amount,
                command: command.into(),
                remarks,
                occasion,
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let wait = cli.wait.map(Duration::from_secs);

    let reconnect_delay = Duration::from_secs(cli.reconnect_secs);
    let reconnect = if cli.backoff {
        ReconnectPolicy::Exponential {
            base: reconnect_delay,
            max: Duration::from_secs(60),
        }
    } else {
        ReconnectPolicy::Fixed(reconnect_delay)
    };
    let config = Config::new(cli.gateway_url, cli.notify_url, cli.merchant_key)
        .with_reconnect(reconnect);
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let form = PaymentForm::from(cli.payment);
    if let Err(e) = form.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let (channel, channel_events) = NotificationChannel::connect(ChannelConfig::from(&config));
    let mut connection = channel.state_changes();
    let session = Session::new(HttpGateway::new(&config));
    let mut updates = session.subscribe();

    let flow = async {
        if connection
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .is_err()
        {
            warn!("notification channel stopped before connecting");
        }
        session.submit(&form).await?;
        Ok::<_, SubmitError>(wait_for_outcome(&mut updates).await)
    };
    let flow = async move {
        match wait {
            Some(limit) => tokio::time::timeout(limit, flow)
                .await
                .unwrap_or(Ok(None)),
            None => flow.await,
        }
    };

    let result = tokio::select! {
        _ = session.run(channel_events) => Ok(None),
        result = flow => result,
    };
    channel.shutdown().await;

    match result {
        Ok(Some(outcome)) => {
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("failed to serialize outcome: {e}"),
            }
            if outcome.result() == OutcomeResult::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        }
        Ok(None) => {
            warn!("no payment result received");
            ExitCode::from(3)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Wait until the tracked request settles.
async fn wait_for_outcome(
    updates: &mut (impl Stream<Item = SessionEvent> + Unpin),
) -> Option<Outcome> {
    while let Some(event) = updates.next().await {
        match event {
            SessionEvent::Awaiting(request) => {
                info!(primary = %request.primary_id(), "payment accepted, waiting for result");
            }
            SessionEvent::Settled { outcome, .. } => return Some(outcome),
            SessionEvent::Connection(ConnectionState::Disconnected) => {
                warn!("notification channel lost, reconnecting");
            }
            _ => {}
        }
    }
    None
}
