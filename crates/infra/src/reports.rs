//! Ledger reports computed from the journal and the chart of accounts.
//!
//! - Trial balance as of a date
//! - Profit and loss over a date range
//! - Balance sheet as of a date
//! - General ledger of one account
//!
//! Reports are pure reads over [`ReadModels`]: the same journal always yields
//! the same report. Amounts are minor units; sums are `i128` like
//! [`AccountBalance`](crate::projections::AccountBalance).

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use ezbooks_accounting::{AccountId, AccountKind, EntrySide, FinalEntry};
use ezbooks_core::{EntryId, TenantId};

use crate::projections::{AccountView, ReadModels};

/// One account on the trial balance. Exactly one of `debit` and `credit` is
/// non-zero unless the account nets to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalanceLine {
    pub account_id: AccountId,
    pub account: String,
    pub kind: AccountKind,
    pub debit: i128,
    pub credit: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debits: i128,
    pub total_credits: i128,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportLine {
    pub account_id: AccountId,
    pub account: String,
    pub amount: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfitAndLoss {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub revenue: Vec<ReportLine>,
    pub total_revenue: i128,
    pub expenses: Vec<ReportLine>,
    pub total_expenses: i128,
    pub net_income: i128,
}

/// Liabilities and equity are shown on their credit side; `retained_earnings`
/// is income less expenses posted up to `as_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: Vec<ReportLine>,
    pub total_assets: i128,
    pub liabilities: Vec<ReportLine>,
    pub total_liabilities: i128,
    pub equity: Vec<ReportLine>,
    pub total_equity: i128,
    pub retained_earnings: i128,
}

impl BalanceSheet {
    /// Assets = liabilities + equity + retained earnings.
    pub fn is_balanced(&self) -> bool {
        self.total_assets == self.total_liabilities + self.total_equity + self.retained_earnings
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerLine {
    pub date: NaiveDate,
    pub entry_id: EntryId,
    pub memo: Option<String>,
    pub debit: i128,
    pub credit: i128,
    /// Running balance on the account's normal side.
    pub balance: i128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneralLedger {
    pub account_id: AccountId,
    pub account: String,
    pub kind: AccountKind,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Balance carried in from entries dated before `from`.
    pub opening_balance: i128,
    pub lines: Vec<LedgerLine>,
    pub closing_balance: i128,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Totals {
    debits: i128,
    credits: i128,
}

impl Totals {
    fn add(&mut self, side: EntrySide, amount: i64) {
        match side {
            EntrySide::Debit => self.debits += amount as i128,
            EntrySide::Credit => self.credits += amount as i128,
        }
    }

    /// Positive when the account carries a balance on its normal side.
    fn normal(self, kind: AccountKind) -> i128 {
        match kind.normal_side() {
            EntrySide::Debit => self.debits - self.credits,
            EntrySide::Credit => self.credits - self.debits,
        }
    }
}

/// Assets, liabilities, equity, income, expenses.
fn kind_rank(kind: AccountKind) -> u8 {
    match kind {
        AccountKind::Asset => 0,
        AccountKind::Liability => 1,
        AccountKind::Equity => 2,
        AccountKind::Income => 3,
        AccountKind::Expense => 4,
    }
}

/// Report builder over one tenant's read models.
#[derive(Debug, Clone, Copy)]
pub struct Reports<'a> {
    read: &'a ReadModels,
    tenant_id: TenantId,
}

impl<'a> Reports<'a> {
    pub fn new(read: &'a ReadModels, tenant_id: TenantId) -> Self {
        Self { read, tenant_id }
    }

    pub fn trial_balance(&self, as_of: NaiveDate) -> TrialBalance {
        let totals = self.totals(|date| date <= as_of);

        let mut lines: Vec<TrialBalanceLine> = self
            .chart(None)
            .into_iter()
            .map(|a| {
                let net = totals.get(&a.id).copied().unwrap_or_default().normal(a.kind);
                let on_normal_side = net >= 0;
                let (debit, credit) = match (a.kind.normal_side(), on_normal_side) {
                    (EntrySide::Debit, true) | (EntrySide::Credit, false) => (net.abs(), 0),
                    (EntrySide::Credit, true) | (EntrySide::Debit, false) => (0, net.abs()),
                };
                TrialBalanceLine {
                    account_id: a.id,
                    account: a.name,
                    kind: a.kind,
                    debit,
                    credit,
                }
            })
            .collect();
        lines.sort_by_key(|l| kind_rank(l.kind));

        TrialBalance {
            as_of,
            total_debits: lines.iter().map(|l| l.debit).sum(),
            total_credits: lines.iter().map(|l| l.credit).sum(),
            lines,
        }
    }

    /// `business` restricts the report to business (`true`) or personal
    /// (`false`) accounts; `None` blends both.
    pub fn profit_and_loss(&self, from: NaiveDate, to: NaiveDate, business: Option<bool>) -> ProfitAndLoss {
        let totals = self.totals(|date| from <= date && date <= to);
        let chart = self.chart(business);

        let revenue = positive_lines(&chart, &totals, AccountKind::Income);
        let expenses = positive_lines(&chart, &totals, AccountKind::Expense);
        let total_revenue: i128 = revenue.iter().map(|l| l.amount).sum();
        let total_expenses: i128 = expenses.iter().map(|l| l.amount).sum();

        ProfitAndLoss {
            from,
            to,
            revenue,
            total_revenue,
            expenses,
            total_expenses,
            net_income: total_revenue - total_expenses,
        }
    }

    pub fn balance_sheet(&self, as_of: NaiveDate) -> BalanceSheet {
        let totals = self.totals(|date| date <= as_of);
        let chart = self.chart(None);

        let section = |kind: AccountKind| -> Vec<ReportLine> {
            chart
                .iter()
                .filter(|a| a.kind == kind)
                .map(|a| ReportLine {
                    account_id: a.id,
                    account: a.name.clone(),
                    amount: totals.get(&a.id).copied().unwrap_or_default().normal(kind),
                })
                .collect()
        };
        let net_of = |kind: AccountKind| -> i128 {
            chart
                .iter()
                .filter(|a| a.kind == kind)
                .map(|a| totals.get(&a.id).copied().unwrap_or_default().normal(kind))
                .sum()
        };

        let assets = section(AccountKind::Asset);
        let liabilities = section(AccountKind::Liability);
        let equity = section(AccountKind::Equity);

        BalanceSheet {
            as_of,
            total_assets: assets.iter().map(|l| l.amount).sum(),
            total_liabilities: liabilities.iter().map(|l| l.amount).sum(),
            total_equity: equity.iter().map(|l| l.amount).sum(),
            retained_earnings: net_of(AccountKind::Income) - net_of(AccountKind::Expense),
            assets,
            liabilities,
            equity,
        }
    }

    /// `None` when the account is not in this tenant's chart.
    pub fn general_ledger(&self, account_id: AccountId, from: NaiveDate, to: NaiveDate) -> Option<GeneralLedger> {
        let account = self.read.accounts.get(self.tenant_id, account_id)?;
        let normal = account.kind.normal_side();

        let mut opening = Totals::default();
        let mut balance = 0i128;
        let mut lines = Vec::new();

        for entry in self.read.journal.for_account(self.tenant_id, account_id) {
            let date = entry.header.date;
            if date > to {
                break;
            }
            for line in entry.lines.iter().filter(|l| l.account_id == account_id) {
                if date < from {
                    opening.add(line.side, line.amount);
                    continue;
                }
                if lines.is_empty() {
                    balance = opening.normal(account.kind);
                }
                let amount = line.amount as i128;
                balance += if line.side == normal { amount } else { -amount };
                lines.push(LedgerLine {
                    date,
                    entry_id: entry.id(),
                    memo: entry.header.memo.clone(),
                    debit: if line.side == EntrySide::Debit { amount } else { 0 },
                    credit: if line.side == EntrySide::Credit { amount } else { 0 },
                    balance,
                });
            }
        }

        let opening_balance = opening.normal(account.kind);
        Some(GeneralLedger {
            account_id,
            account: account.name,
            kind: account.kind,
            from,
            to,
            opening_balance,
            closing_balance: lines.last().map_or(opening_balance, |l| l.balance),
            lines,
        })
    }

    /// Debit and credit totals per account over entries whose date passes
    /// `in_range`.
    fn totals(&self, in_range: impl Fn(NaiveDate) -> bool) -> HashMap<AccountId, Totals> {
        let mut totals: HashMap<AccountId, Totals> = HashMap::new();
        let journal: Vec<FinalEntry> = self.read.journal.list(self.tenant_id);
        for entry in journal.iter().filter(|e| in_range(e.header.date)) {
            for line in &entry.lines {
                totals.entry(line.account_id).or_default().add(line.side, line.amount);
            }
        }
        totals
    }

    fn chart(&self, business: Option<bool>) -> Vec<AccountView> {
        self.read
            .accounts
            .list(self.tenant_id)
            .into_iter()
            .filter(|a| business.is_none_or(|b| a.is_business == b))
            .collect()
    }
}

fn positive_lines(chart: &[AccountView], totals: &HashMap<AccountId, Totals>, kind: AccountKind) -> Vec<ReportLine> {
    chart
        .iter()
        .filter(|a| a.kind == kind)
        .filter_map(|a| {
            let amount = totals.get(&a.id).copied().unwrap_or_default().normal(kind);
            (amount > 0).then(|| ReportLine {
                account_id: a.id,
                account: a.name.clone(),
                amount,
            })
        })
        .collect()
}
