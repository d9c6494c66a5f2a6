//! Shared fixtures for integration tests.
//!
//! A small banking application: an `accounts` aggregate, an `onboarding`
//! process, a `notifier` integration and a `balances` projection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use angzarr_testkit::application::{
    AggregateConfigurer, IntegrationConfigurer, ProcessConfigurer, ProjectionConfigurer,
};
use angzarr_testkit::{
    AggregateCommandScope, AggregateMessageHandler, AggregateRoot, Application, Context,
    HandlerError, IntegrationCommandScope, IntegrationMessageHandler, Message,
    ProcessEventScope, ProcessMessageHandler, ProcessTimeoutScope, ProjectionEventScope,
    ProjectionMessageHandler, UnexpectedMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

// --- messages ---

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAccount {
    pub id: String,
}
impl Message for OpenAccount {}

#[derive(Debug, Clone, PartialEq)]
pub struct Deposit {
    pub id: String,
    pub amount: i64,
}
impl Message for Deposit {}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseAccount {
    pub id: String,
}
impl Message for CloseAccount {}

/// Makes the aggregate record an event it does not produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Misbehave {
    pub id: String,
}
impl Message for Misbehave {}

#[derive(Debug, Clone, PartialEq)]
pub struct SendWelcome {
    pub id: String,
}
impl Message for SendWelcome {}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountOpened {
    pub id: String,
}
impl Message for AccountOpened {}

#[derive(Debug, Clone, PartialEq)]
pub struct Deposited {
    pub id: String,
    pub amount: i64,
}
impl Message for Deposited {}

#[derive(Debug, Clone, PartialEq)]
pub struct WelcomeSent {
    pub id: String,
}
impl Message for WelcomeSent {}

#[derive(Debug, Clone, PartialEq)]
pub struct RemindToDeposit {
    pub id: String,
}
impl Message for RemindToDeposit {}

/// Not routed by any handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Unrouted;
impl Message for Unrouted {}

pub const ACCOUNTS: &str = "accounts";
pub const ONBOARDING: &str = "onboarding";
pub const NOTIFIER: &str = "notifier";
pub const BALANCES: &str = "balances";

/// Delay before a new account holder is reminded to deposit.
pub const REMINDER_DELAY: TimeDelta = TimeDelta::seconds(10);

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

// --- accounts aggregate ---

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Account {
    pub open: bool,
    pub balance: i64,
}

impl AggregateRoot for Account {
    fn apply_event(&mut self, event: &dyn Message) -> Result<(), UnexpectedMessage> {
        if event.is::<AccountOpened>() {
            self.open = true;
        } else if let Some(e) = event.downcast_ref::<Deposited>() {
            self.balance += e.amount;
        } else {
            return Err(UnexpectedMessage::new());
        }
        Ok(())
    }
}

/// Records every root it was handed, to check replay.
#[derive(Default)]
pub struct Accounts {
    pub seen: Arc<Mutex<Vec<Account>>>,
}

impl AggregateMessageHandler for Accounts {
    type Root = Account;

    fn configure(&self, c: &mut AggregateConfigurer) {
        c.identity(ACCOUNTS, "0f8a7d3e-5b1c-4e2a-9d6f-1a2b3c4d5e6f")
            .handles_command::<OpenAccount>()
            .handles_command::<Deposit>()
            .handles_command::<CloseAccount>()
            .handles_command::<Misbehave>()
            .records_event::<AccountOpened>()
            .records_event::<Deposited>();
    }

    fn new_root(&self) -> Account {
        Account::default()
    }

    fn route_command_to_instance(&self, command: &dyn Message) -> Result<String, UnexpectedMessage> {
        if let Some(c) = command.downcast_ref::<OpenAccount>() {
            Ok(c.id.clone())
        } else if let Some(c) = command.downcast_ref::<Deposit>() {
            Ok(c.id.clone())
        } else if let Some(c) = command.downcast_ref::<CloseAccount>() {
            Ok(c.id.clone())
        } else if let Some(c) = command.downcast_ref::<Misbehave>() {
            Ok(c.id.clone())
        } else {
            Err(UnexpectedMessage::new())
        }
    }

    fn handle_command(
        &self,
        scope: &mut AggregateCommandScope<'_, Account>,
        command: &dyn Message,
    ) -> Result<(), UnexpectedMessage> {
        self.seen.lock().unwrap().push(scope.root().clone());

        if let Some(c) = command.downcast_ref::<OpenAccount>() {
            if !scope.root().open {
                scope.record_event(AccountOpened { id: c.id.clone() });
            }
        } else if let Some(c) = command.downcast_ref::<Deposit>() {
            if scope.root().open {
                scope.record_event(Deposited {
                    id: c.id.clone(),
                    amount: c.amount,
                });
            } else {
                scope.log("deposit rejected, account is not open");
            }
        } else if command.is::<CloseAccount>() {
            scope.destroy();
        } else if let Some(c) = command.downcast_ref::<Misbehave>() {
            scope.record_event(WelcomeSent { id: c.id.clone() });
        } else {
            return Err(UnexpectedMessage::new());
        }
        Ok(())
    }
}

// --- onboarding process ---

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Onboarding {
    pub reminded: bool,
}

#[derive(Default)]
pub struct OnboardingProcess;

#[async_trait]
impl ProcessMessageHandler for OnboardingProcess {
    type Root = Onboarding;

    fn configure(&self, c: &mut ProcessConfigurer) {
        c.identity(ONBOARDING, "6a1d2c3b-4e5f-4a6b-8c7d-9e0f1a2b3c4d")
            .handles_event::<AccountOpened>()
            .handles_event::<Deposited>()
            .executes_command::<SendWelcome>()
            .schedules_timeout::<RemindToDeposit>();
    }

    fn new_root(&self) -> Onboarding {
        Onboarding::default()
    }

    async fn route_event_to_instance(
        &self,
        _ctx: &Context,
        event: &dyn Message,
    ) -> Result<Option<String>, HandlerError> {
        if let Some(e) = event.downcast_ref::<AccountOpened>() {
            Ok(Some(e.id.clone()))
        } else if let Some(e) = event.downcast_ref::<Deposited>() {
            Ok(Some(e.id.clone()))
        } else {
            Err(Box::new(UnexpectedMessage::new()))
        }
    }

    async fn handle_event(
        &self,
        _ctx: &Context,
        scope: &mut ProcessEventScope<'_, Onboarding>,
        event: &dyn Message,
    ) -> Result<(), HandlerError> {
        if let Some(e) = event.downcast_ref::<AccountOpened>() {
            scope.execute_command(SendWelcome { id: e.id.clone() });
            let at = scope.now() + REMINDER_DELAY;
            scope.schedule_timeout(RemindToDeposit { id: e.id.clone() }, at);
        } else if event.is::<Deposited>() {
            scope.end();
        } else {
            return Err(Box::new(UnexpectedMessage::new()));
        }
        Ok(())
    }

    async fn handle_timeout(
        &self,
        _ctx: &Context,
        scope: &mut ProcessTimeoutScope<'_, Onboarding>,
        timeout: &dyn Message,
    ) -> Result<(), HandlerError> {
        if !timeout.is::<RemindToDeposit>() {
            return Err(Box::new(UnexpectedMessage::new()));
        }
        scope.root_mut().reminded = true;
        scope.log("reminded account holder to deposit");
        Ok(())
    }
}

// --- notifier integration ---

#[derive(Default)]
pub struct Notifier {
    /// Fail every call with this message.
    pub fail_with: Option<String>,
}

#[async_trait]
impl IntegrationMessageHandler for Notifier {
    fn configure(&self, c: &mut IntegrationConfigurer) {
        c.identity(NOTIFIER, "9b8c7d6e-5f4a-4b3c-9d2e-1f0a9b8c7d6e")
            .handles_command::<SendWelcome>()
            .records_event::<WelcomeSent>();
    }

    async fn handle_command(
        &self,
        _ctx: &Context,
        scope: &mut IntegrationCommandScope<'_>,
        command: &dyn Message,
    ) -> Result<(), HandlerError> {
        let Some(c) = command.downcast_ref::<SendWelcome>() else {
            return Err(Box::new(UnexpectedMessage::new()));
        };
        if let Some(message) = &self.fail_with {
            return Err(message.clone().into());
        }
        scope.record_event(WelcomeSent { id: c.id.clone() });
        Ok(())
    }
}

// --- balances projection ---

/// Read model of the balances projection, shared with the test.
#[derive(Debug, Default)]
pub struct BalanceStore {
    pub checkpoints: HashMap<String, u64>,
    pub balances: HashMap<String, i64>,
    /// `(stream, offset)` of every applied event, in order.
    pub applied: Vec<(String, u64)>,
}

#[derive(Default, Clone)]
pub struct Balances {
    pub store: Arc<Mutex<BalanceStore>>,
    /// Return a checkpoint this far off from the correct one.
    pub skew: u64,
}

#[async_trait]
impl ProjectionMessageHandler for Balances {
    fn configure(&self, c: &mut ProjectionConfigurer) {
        c.identity(BALANCES, "3c2b1a0f-9e8d-4c7b-a6f5-e4d3c2b1a0f9")
            .handles_event::<AccountOpened>()
            .handles_event::<Deposited>();
    }

    async fn checkpoint_offset(&self, _ctx: &Context, stream_id: &str) -> Result<u64, HandlerError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .checkpoints
            .get(stream_id)
            .copied()
            .unwrap_or(0))
    }

    async fn handle_event(
        &self,
        _ctx: &Context,
        scope: &mut ProjectionEventScope<'_>,
        event: &dyn Message,
    ) -> Result<u64, HandlerError> {
        let next = scope.offset() + 1 + self.skew;
        if self.skew > 0 {
            return Ok(next);
        }

        let mut store = self.store.lock().unwrap();
        if let Some(e) = event.downcast_ref::<AccountOpened>() {
            store.balances.insert(e.id.clone(), 0);
        } else if let Some(e) = event.downcast_ref::<Deposited>() {
            *store.balances.entry(e.id.clone()).or_default() += e.amount;
        } else {
            return Err(Box::new(UnexpectedMessage::new()));
        }
        store.applied.push((scope.stream_id().to_string(), scope.offset()));
        store.checkpoints.insert(scope.stream_id().to_string(), next);
        Ok(next)
    }
}

/// The application with every handler registered.
pub fn bank() -> Application {
    bank_with(Accounts::default(), Notifier::default(), Balances::default())
}

pub fn bank_with(accounts: Accounts, notifier: Notifier, balances: Balances) -> Application {
    Application::builder("bank", "5d4c3b2a-1f0e-4d9c-8b7a-6f5e4d3c2b1a")
        .aggregate(accounts)
        .process(OnboardingProcess)
        .integration(notifier)
        .projection(balances)
        .build()
}
