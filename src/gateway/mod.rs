//! Telegram chat gateway
//!
//! Long-polls the Telegram API for commands, parses arguments into
//! participant ids and integers, and hands typed commands to the handler.
//! The handler enforces the admin allow-list, maps core error kinds to
//! user-facing text, and forwards every command and failure to the log
//! channel.

use crate::error::{RaffleError, Result};
use crate::notify::Notifier;
use crate::raffle::Raffle;
use crate::types::{BetId, UserId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Commands parsed from chat messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register,
    Status,
    BuyIn { amount: u64 },
    Bet { amount: u64, others: Vec<UserId>, name: Option<String> },
    ResolveBet { bet_id: BetId, winners: Vec<UserId> },
    MyBets,
    DrawPrep,
    Draw,
    SettleAll,
    ResetUser { targets: Vec<UserId> },
    Help,
}

/// A command plus where it came from.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: UserId,
    pub chat: i64,
    pub command: Command,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
}

/// Polls Telegram for updates and emits parsed commands.
pub struct TelegramGateway {
    http: Client,
    bot_token: String,
    last_update_id: RwLock<i64>,
    command_tx: mpsc::Sender<Envelope>,
}

impl TelegramGateway {
    pub fn new(bot_token: String, command_tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            http: Client::new(),
            bot_token,
            last_update_id: RwLock::new(0),
            command_tx,
        }
    }

    /// Start polling for updates.
    pub async fn start_polling(self: Arc<Self>) {
        tracing::info!("Starting Telegram command listener...");

        loop {
            match self.poll_updates().await {
                Ok(updates) => {
                    for update in updates {
                        if let Some(msg) = update.message {
                            if let (Some(from), Some(text)) = (msg.from, msg.text) {
                                self.handle_message(UserId(from.id), msg.chat.id, &text).await;
                            }
                        }

                        let mut last_id = self.last_update_id.write().await;
                        *last_id = update.update_id + 1;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to poll Telegram updates: {}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        }
    }

    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let last_id = *self.last_update_id.read().await;

        let url = format!(
            "https://api.telegram.org/bot{}/getUpdates?offset={}&timeout=30",
            self.bot_token, last_id
        );

        let response: GetUpdatesResponse = self.http.get(&url).send().await?.json().await?;
        Ok(response.result)
    }

    async fn handle_message(&self, from: UserId, chat: i64, text: &str) {
        let text = text.trim();
        let (cmd, args) = match split_command(text) {
            Some(parts) => parts,
            None => return, // not a command
        };

        match parse_command(&cmd, args) {
            Ok(command) => {
                let _ = self
                    .command_tx
                    .send(Envelope { from, chat, command })
                    .await;
            }
            Err(usage) => self.reply(chat, &usage).await,
        }
    }

    async fn reply(&self, chat: i64, text: &str) {
        send_message(&self.http, &self.bot_token, chat, text).await;
    }
}

async fn send_message(http: &Client, bot_token: &str, chat: i64, text: &str) {
    let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
    let request = SendMessageRequest {
        chat_id: chat.to_string(),
        text: text.to_string(),
    };
    if let Err(e) = http.post(&url).json(&request).send().await {
        tracing::error!("Failed to send reply: {e}");
    }
}

/// Split "/cmd@botname args" into (cmd, args). `None` for non-commands.
fn split_command(text: &str) -> Option<(String, &str)> {
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let cmd = parts.next()?.split('@').next()?.to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");
    Some((cmd, args))
}

/// Parse a money amount; a leading '$' is tolerated, anything else that is
/// not a whole non-negative number is rejected.
fn parse_amount(raw: &str) -> Option<u64> {
    raw.trim().trim_start_matches('$').parse().ok()
}

/// Parse a user reference: a plain numeric id, optionally '@'-prefixed.
fn parse_user(raw: &str) -> Option<UserId> {
    raw.trim().trim_start_matches('@').parse().map(UserId).ok()
}

/// Parse an '@'-prefixed user mention. Bare numbers are not accepted here;
/// a bet name like "2024 rematch" must not be mistaken for a participant.
fn parse_mention(raw: &str) -> Option<UserId> {
    raw.trim().strip_prefix('@')?.parse().map(UserId).ok()
}

/// Bet args: `<amount> <@user..> [name..]`. Mentions run until the first
/// token without an '@' prefix; everything after that is the bet name.
fn parse_bet_args(args: &str) -> Option<(u64, Vec<UserId>, Option<String>)> {
    let mut tokens = args.split_whitespace();
    let amount = parse_amount(tokens.next()?)?;

    let mut others = Vec::new();
    let mut name_tokens = Vec::new();
    for token in tokens {
        if name_tokens.is_empty() {
            if let Some(user) = parse_mention(token) {
                others.push(user);
                continue;
            }
        }
        name_tokens.push(token);
    }
    if others.is_empty() {
        return None;
    }

    let name = if name_tokens.is_empty() {
        None
    } else {
        Some(name_tokens.join(" "))
    };
    Some((amount, others, name))
}

fn parse_users(args: &str) -> Option<Vec<UserId>> {
    let users: Option<Vec<UserId>> = args.split_whitespace().map(parse_user).collect();
    users.filter(|u| !u.is_empty())
}

fn parse_command(cmd: &str, args: &str) -> std::result::Result<Command, String> {
    match cmd {
        "start" | "help" => Ok(Command::Help),
        "register" => Ok(Command::Register),
        "status" => Ok(Command::Status),
        "buyin" => match parse_amount(args) {
            Some(amount) => Ok(Command::BuyIn { amount }),
            None => Err("Invalid input value. Please input a whole number value.\nUsage: /buyin <amount>".to_string()),
        },
        "bet" => match parse_bet_args(args) {
            Some((amount, others, name)) => Ok(Command::Bet { amount, others, name }),
            None => Err("Usage: /bet <tickets> <@user..> [name]".to_string()),
        },
        "resolvebet" => {
            let mut tokens = args.split_whitespace();
            let bet_id = tokens
                .next()
                .and_then(|t| t.trim_start_matches('#').parse().ok())
                .map(BetId);
            let winners = parse_users(&tokens.collect::<Vec<_>>().join(" "));
            match (bet_id, winners) {
                (Some(bet_id), Some(winners)) => Ok(Command::ResolveBet { bet_id, winners }),
                _ => Err("Usage: /resolvebet <id> <winner..>".to_string()),
            }
        }
        "mybets" => Ok(Command::MyBets),
        "drawprep" => Ok(Command::DrawPrep),
        "draw" => Ok(Command::Draw),
        "settleall" => Ok(Command::SettleAll),
        "resetuser" => match parse_users(args) {
            Some(targets) => Ok(Command::ResetUser { targets }),
            None => Err("Usage: /resetuser <user..>".to_string()),
        },
        other => Err(format!("Unknown command: /{other}\nUse /help for available commands")),
    }
}

/// Processes parsed commands against the raffle core.
pub struct CommandHandler {
    http: Client,
    bot_token: String,
    raffle: Arc<Raffle>,
    notifier: Notifier,
    admins: HashSet<UserId>,
}

impl CommandHandler {
    pub fn new(
        bot_token: String,
        raffle: Arc<Raffle>,
        notifier: Notifier,
        admins: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            http: Client::new(),
            bot_token,
            raffle,
            notifier,
            admins: admins.into_iter().collect(),
        }
    }

    fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    pub async fn handle(&self, envelope: Envelope) {
        let Envelope { from, chat, command } = envelope;
        self.notifier
            .log(&format!("Received {command:?} from {from}"))
            .await;

        if command_is_admin_only(&command) && !self.is_admin(from) {
            self.notifier
                .log(&format!("{from} attempted {command:?} without admin rights"))
                .await;
            self.reply(chat, "You are not an admin so you cannot run that command.")
                .await;
            return;
        }

        match command {
            Command::Help => self.send_help(chat).await,
            Command::Register => self.register(from, chat).await,
            Command::Status => self.status(from, chat).await,
            Command::BuyIn { amount } => self.buy_in(from, chat, amount).await,
            Command::Bet { amount, others, name } => {
                self.create_bet(from, chat, amount, &others, name.as_deref()).await
            }
            Command::ResolveBet { bet_id, winners } => {
                self.resolve_bet(from, chat, bet_id, &winners).await
            }
            Command::MyBets => self.my_bets(from, chat).await,
            Command::DrawPrep => self.draw_prep(chat).await,
            Command::Draw => self.draw(chat).await,
            Command::SettleAll => self.settle_all(chat).await,
            Command::ResetUser { targets } => self.reset_users(chat, &targets).await,
        }
    }

    async fn register(&self, from: UserId, chat: i64) {
        let (entry, newly) = self.raffle.register(from);
        if newly {
            self.notifier.log(&format!("{from} registered")).await;
        }
        self.reply(
            chat,
            &format!(
                "You are registered with {} tickets available.\n\
                 Ticket prices are {}.\n\
                 Use /buyin <amount of money> to buy in.",
                entry.tickets_available,
                self.raffle.pricing().price_list()
            ),
        )
        .await;
    }

    async fn status(&self, from: UserId, chat: i64) {
        match self.raffle.status(from) {
            Some(entry) => {
                self.reply(chat, &entry_summary(&entry)).await;
            }
            None => {
                self.reply(chat, "You are not registered. Use /register to register.")
                    .await;
            }
        }
    }

    async fn buy_in(&self, from: UserId, chat: i64, amount: u64) {
        let (quote, entry) = match self.raffle.buy_in(from, amount) {
            Ok(result) => result,
            Err(e) => return self.report_error(chat, &e).await,
        };
        self.notifier
            .log(&format!(
                "{from} bought in ${amount}: charged ${}, granted {} tickets",
                quote.amount_charged, quote.tickets_granted
            ))
            .await;
        let mut text = format!(
            "Charged ${} for {} tickets.\n{}",
            quote.amount_charged,
            quote.tickets_granted,
            entry_summary(&entry)
        );
        let leftover = amount - quote.amount_charged;
        if leftover > 0 {
            text.push_str(&format!("\n(${leftover} was below the cheapest tier and was not charged.)"));
        }
        self.reply(chat, &text).await;
    }

    async fn create_bet(
        &self,
        from: UserId,
        chat: i64,
        amount: u64,
        others: &[UserId],
        name: Option<&str>,
    ) {
        match self.raffle.create_bet(from, others, amount, name) {
            Ok(id) => {
                let label = name.map(|n| format!(" '{n}'")).unwrap_or_default();
                self.reply(
                    chat,
                    &format!(
                        "Bet {id}{label} is on: {amount} tickets from each of {} participants.\n\
                         Resolve it with /resolvebet {} <winner..>",
                        others.len() + 1,
                        id.0
                    ),
                )
                .await;
                // Let the counterparties know their tickets are escrowed.
                for &user in others {
                    self.reply(
                        user.0,
                        &format!("{from} opened bet {id}{label} with you: {amount} tickets escrowed."),
                    )
                    .await;
                }
            }
            Err(e) => self.report_error(chat, &e).await,
        }
    }

    async fn resolve_bet(&self, from: UserId, chat: i64, bet_id: BetId, winners: &[UserId]) {
        match self
            .raffle
            .resolve_bet(bet_id, from, self.is_admin(from), winners)
        {
            Ok(dist) => {
                let lines: Vec<String> = dist
                    .awards
                    .iter()
                    .map(|(user, award)| format!("{user} receives {award} tickets"))
                    .collect();
                self.reply(
                    chat,
                    &format!(
                        "Bet {bet_id} resolved. Pool of {} tickets paid out:\n{}",
                        dist.total_pool,
                        lines.join("\n")
                    ),
                )
                .await;
            }
            Err(e) => self.report_error(chat, &e).await,
        }
    }

    async fn my_bets(&self, from: UserId, chat: i64) {
        let bets = self.raffle.open_bets_for(from);
        if bets.is_empty() {
            self.reply(chat, "You have no open bets.").await;
            return;
        }
        let lines: Vec<String> = bets
            .iter()
            .map(|bet| {
                let label = bet
                    .name
                    .as_deref()
                    .map(|n| format!(" '{n}'"))
                    .unwrap_or_default();
                format!(
                    "{}{label}: {} tickets each, pool {}, {} participants",
                    bet.id,
                    bet.amount_per_participant,
                    bet.total_pool,
                    bet.participants.len()
                )
            })
            .collect();
        self.reply(chat, &format!("Your open bets:\n{}", lines.join("\n")))
            .await;
    }

    async fn draw_prep(&self, chat: i64) {
        let roster = self.raffle.roster();
        for (user, entry) in &roster {
            self.reply(
                user.0,
                &format!(
                    "The drawing is about to happen! Get in your final bets and buyins!\n{}",
                    entry_summary(entry)
                ),
            )
            .await;
        }
        self.reply(chat, &format!("Notified {} participants.", roster.len()))
            .await;
    }

    async fn draw(&self, chat: i64) {
        match self.raffle.draw() {
            Some(winner) => {
                self.notifier.log(&format!("Draw winner: {winner}")).await;
                self.reply(chat, &format!("And the winner is {winner}!!")).await;
            }
            None => {
                self.notifier.log("Draw with no entries, no winner").await;
                self.reply(chat, "No tickets outstanding, no winner.").await;
            }
        }
    }

    async fn settle_all(&self, chat: i64) {
        let (rows, total) = self.raffle.settle_totals();
        let mut lines: Vec<String> = rows
            .iter()
            .map(|(user, owed)| format!("{user}: ${owed}"))
            .collect();
        lines.push(format!("total: ${total}"));
        let text = lines.join("\n");
        self.notifier.log(&text).await;
        self.reply(chat, &text).await;
    }

    async fn reset_users(&self, chat: i64, targets: &[UserId]) {
        for &user in targets {
            match self.raffle.reset_user(user) {
                Ok(()) => {
                    self.reply(chat, &format!("{user} has been reset.")).await;
                }
                Err(e) => self.report_error(chat, &e).await,
            }
        }
    }

    async fn send_help(&self, chat: i64) {
        let help_text = "Raffle bot commands\n\n\
            /register - Join the game\n\
            /status - Your tickets and amount owed\n\
            /buyin <amount> - Buy tickets\n\
            /bet <tickets> <@user..> [name] - Open a side bet\n\
            /resolvebet <id> <winner..> - Pay out a bet\n\
            /mybets - Your open bets\n\n\
            Admin\n\
            /drawprep - Warn everyone the draw is coming\n\
            /draw - Run the drawing\n\
            /settleall - Amounts owed per participant\n\
            /resetuser <user..> - Zero a participant\n\n\
            /help - Show this message";
        self.reply(chat, help_text).await;
    }

    async fn report_error(&self, chat: i64, err: &RaffleError) {
        self.notifier.log(&format!("Command failed: {err}")).await;
        self.reply(chat, &error_text(err)).await;
    }

    async fn reply(&self, chat: i64, text: &str) {
        send_message(&self.http, &self.bot_token, chat, text).await;
    }
}

fn command_is_admin_only(command: &Command) -> bool {
    matches!(
        command,
        Command::DrawPrep | Command::Draw | Command::SettleAll | Command::ResetUser { .. }
    )
}

fn entry_summary(entry: &crate::ledger::LedgerEntry) -> String {
    format!(
        "Tickets available: {}, Amount owed: ${}",
        entry.tickets_available, entry.amount_owed
    )
}

/// Map a core error kind to user-facing text.
fn error_text(err: &RaffleError) -> String {
    match err {
        RaffleError::InvalidAmount(reason) => format!("Invalid input: {reason}."),
        RaffleError::ParticipantNotRegistered(user) => {
            format!("{user} is not registered. They can join with /register.")
        }
        RaffleError::BetRejected(violations) => {
            let mut lines = vec!["The bet was not placed:".to_string()];
            lines.extend(violations.iter().map(|v| format!("- {v}")));
            lines.join("\n")
        }
        RaffleError::BetNotFound(id) => format!("There is no bet {id}."),
        RaffleError::BetAlreadyClosed(id) => format!("Bet {id} was already resolved."),
        RaffleError::WinnerNotParticipant(user) => {
            format!("{user} is not in that bet, so they cannot win it.")
        }
        RaffleError::PermissionDenied(user) => {
            format!("{user} is not part of that bet and cannot close it.")
        }
        other => {
            tracing::error!("Internal error surfaced to user: {other}");
            "Something went wrong. The organizers have been notified.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_command_and_args() {
        assert_eq!(
            split_command("/buyin 45"),
            Some(("buyin".to_string(), "45"))
        );
        assert_eq!(
            split_command("/status@raffle_bot"),
            Some(("status".to_string(), ""))
        );
        assert_eq!(split_command("hello"), None);
    }

    #[test]
    fn parses_amount_with_dollar_prefix() {
        assert_eq!(parse_amount("$45"), Some(45));
        assert_eq!(parse_amount(" 45 "), Some(45));
        assert_eq!(parse_amount("-3"), None);
        assert_eq!(parse_amount("lots"), None);
    }

    #[test]
    fn parses_buyin_command() {
        assert_eq!(
            parse_command("buyin", "$20"),
            Ok(Command::BuyIn { amount: 20 })
        );
        assert!(parse_command("buyin", "twenty").is_err());
    }

    #[test]
    fn parses_bet_command_with_name() {
        let cmd = parse_command("bet", "5 @111 @222 loser buys pizza").unwrap();
        assert_eq!(
            cmd,
            Command::Bet {
                amount: 5,
                others: vec![UserId(111), UserId(222)],
                name: Some("loser buys pizza".to_string()),
            }
        );
    }

    #[test]
    fn parses_bet_command_without_name() {
        let cmd = parse_command("bet", "3 @111").unwrap();
        assert_eq!(
            cmd,
            Command::Bet {
                amount: 3,
                others: vec![UserId(111)],
                name: None,
            }
        );
    }

    #[test]
    fn bet_name_starting_with_a_number_stays_a_name() {
        let cmd = parse_command("bet", "5 @111 2024 rematch").unwrap();
        assert_eq!(
            cmd,
            Command::Bet {
                amount: 5,
                others: vec![UserId(111)],
                name: Some("2024 rematch".to_string()),
            }
        );
    }

    #[test]
    fn bet_requires_a_counterparty() {
        assert!(parse_command("bet", "3").is_err());
        assert!(parse_command("bet", "").is_err());
        // A bare number is a name token, not a mention.
        assert!(parse_command("bet", "3 111").is_err());
    }

    #[test]
    fn parses_resolvebet_command() {
        let cmd = parse_command("resolvebet", "#4 111 222").unwrap();
        assert_eq!(
            cmd,
            Command::ResolveBet {
                bet_id: BetId(4),
                winners: vec![UserId(111), UserId(222)],
            }
        );
        assert!(parse_command("resolvebet", "4").is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(parse_command("dance", "").is_err());
    }

    #[test]
    fn admin_only_commands() {
        assert!(command_is_admin_only(&Command::Draw));
        assert!(command_is_admin_only(&Command::SettleAll));
        assert!(!command_is_admin_only(&Command::Status));
        assert!(!command_is_admin_only(&Command::Bet {
            amount: 1,
            others: vec![UserId(1)],
            name: None,
        }));
    }

    #[test]
    fn error_text_lists_every_violation() {
        use crate::error::Violation;
        let err = RaffleError::BetRejected(vec![
            Violation::NotRegistered(UserId(1)),
            Violation::InsufficientTickets {
                participant: UserId(2),
                available: 1,
                required: 5,
            },
        ]);
        let text = error_text(&err);
        assert!(text.contains("participant 1 is not registered"));
        assert!(text.contains("participant 2 has 1 tickets, needs 5"));
    }
}
