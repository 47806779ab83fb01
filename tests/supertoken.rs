use supertoken::{
    AccountId, Agreement, AgreementId, Caller, FixedPointValue, FlowAgreement, ReserveToken,
    SuperToken, SuperTokenError, TokenConfig, UnderlyingToken, WAD,
};

const INIT_BALANCE: i64 = 100;

struct Tester {
    token: SuperToken,
    flow: FlowAgreement,
    reserve: ReserveToken,
}

fn tokens(n: i64) -> FixedPointValue {
    FixedPointValue::from_tokens(n)
}

fn wei(n: i128) -> FixedPointValue {
    FixedPointValue::from_wad(n)
}

fn alice() -> AccountId {
    "alice".to_string()
}

fn bob() -> AccountId {
    "bob".to_string()
}

fn carol() -> AccountId {
    "carol".to_string()
}

impl Tester {
    fn new() -> Self {
        let config = TokenConfig {
            name: "SuperTestToken".into(),
            symbol: "STT".into(),
            ..TokenConfig::default()
        };
        let (token, flow) = SuperToken::with_flow_agreement(config).unwrap();
        let mut reserve = ReserveToken::new();
        for who in [alice(), bob(), carol()] {
            reserve.mint(&who, tokens(INIT_BALANCE)).unwrap();
        }
        Self {
            token,
            flow,
            reserve,
        }
    }

    fn upgrade(&mut self, who: &AccountId, amount: FixedPointValue, at: u64) {
        self.token
            .upgrade(who, amount, at, &mut self.reserve)
            .unwrap();
    }

    fn validate_system(&self, at: u64) {
        self.token.validate_system(at).unwrap();
        self.token.validate_reserves(&self.reserve).unwrap();
    }
}

#[test]
fn token_info() {
    let t = Tester::new();
    assert_eq!(t.token.name(), "SuperTestToken");
    assert_eq!(t.token.symbol(), "STT");
    assert_eq!(t.token.decimals(), 18);
}

#[test]
fn upgrade_with_enough_balance() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);

    assert_eq!(t.token.balance_of(&alice(), 1).unwrap(), tokens(2));
    assert_eq!(t.reserve.balance_of(&alice()), tokens(INIT_BALANCE - 2));
    assert_eq!(
        t.token.realtime_balance_of(&alice(), 1).unwrap(),
        t.token.settled_entry(&alice()).settled_balance
    );
    t.validate_system(1);
}

#[test]
fn upgrade_without_enough_underlying() {
    let mut t = Tester::new();
    let err = t
        .token
        .upgrade(&alice(), tokens(INIT_BALANCE).checked_add(wei(1)).unwrap(), 1, &mut t.reserve)
        .unwrap_err();
    assert_eq!(err.reason(), "ERC20: transfer amount exceeds balance");
    t.validate_system(1);
}

#[test]
fn downgrade_by_single_account() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);
    t.token
        .downgrade(&alice(), tokens(1), 2, &mut t.reserve)
        .unwrap();

    assert_eq!(t.reserve.balance_of(&alice()), tokens(INIT_BALANCE - 1));
    assert_eq!(t.token.balance_of(&alice(), 2).unwrap(), tokens(1));
    t.validate_system(2);
}

#[test]
fn downgrade_by_multiple_accounts() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);
    t.upgrade(&bob(), tokens(1), 1);
    t.token
        .downgrade(&alice(), tokens(2), 2, &mut t.reserve)
        .unwrap();

    assert_eq!(t.reserve.balance_of(&alice()), tokens(INIT_BALANCE));
    assert!(t.token.balance_of(&alice(), 2).unwrap().is_zero());
    assert_eq!(t.token.balance_of(&bob(), 2).unwrap(), tokens(1));
    t.validate_system(2);
}

#[test]
fn downgrade_without_balance() {
    let mut t = Tester::new();
    let err = t
        .token
        .downgrade(&alice(), wei(1), 1, &mut t.reserve)
        .unwrap_err();
    assert_eq!(err.reason(), "SuperToken: downgrade amount exceeds balance");
    assert_eq!(t.reserve.balance_of(&alice()), tokens(INIT_BALANCE));
}

#[test]
fn tracks_active_agreement_classes() {
    let mut t = Tester::new();
    let flow_id = t.flow.id().clone();

    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 1)
        .unwrap();
    assert_eq!(t.token.get_account_active_agreements(&alice()), &[flow_id.clone()]);
    assert_eq!(t.token.get_account_active_agreements(&bob()), &[flow_id.clone()]);
    assert!(t.token.get_account_active_agreements(&carol()).is_empty());

    t.flow
        .update_flow(&mut t.token, &Caller::account("bob"), &bob(), &carol(), tokens(2), 2)
        .unwrap();
    assert_eq!(t.token.get_account_active_agreements(&alice()), &[flow_id.clone()]);
    assert_eq!(t.token.get_account_active_agreements(&bob()), &[flow_id.clone()]);
    assert_eq!(t.token.get_account_active_agreements(&carol()), &[flow_id.clone()]);

    t.flow
        .delete_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), 3)
        .unwrap();
    assert!(t.token.get_account_active_agreements(&alice()).is_empty());
    assert_eq!(t.token.get_account_active_agreements(&bob()), &[flow_id.clone()]);
    assert_eq!(t.token.get_account_active_agreements(&carol()), &[flow_id]);

    t.validate_system(3);
}

#[test]
fn only_authorized_agreement_updates_state() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);
    let before = t.token.snapshot().unwrap();

    let flow_id = t.flow.id().clone();
    let caller = Caller::account("alice");
    let err = t
        .token
        .update_agreement_account_state(&caller, &flow_id, &alice(), Some(vec![0x42]), 2)
        .unwrap_err();
    assert!(matches!(err, SuperTokenError::UnauthorizedAgreementAccess { .. }));
    assert_eq!(err.reason(), "SuperToken: unauthorized agreement storage access");
    assert_eq!(t.token.snapshot().unwrap(), before);
    assert_eq!(t.token.balance_of(&alice(), 2).unwrap(), tokens(2));
}

#[test]
fn other_agreement_cannot_write_flow_state() {
    let mut t = Tester::new();
    let other = AgreementId::from("other");
    t.token
        .register_agreement(Box::new(FlowAgreement::new(other.clone())))
        .unwrap();
    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 0)
        .unwrap();
    let before = t.token.snapshot().unwrap();

    let flow_id = t.flow.id().clone();
    let forged = Caller::agreement(&other);
    let err = t
        .token
        .update_agreement_account_state(&forged, &flow_id, &alice(), None, 1)
        .unwrap_err();
    assert_eq!(
        err,
        SuperTokenError::UnauthorizedAgreementAccess {
            caller: forged.clone(),
            owner: flow_id.clone(),
        }
    );
    let err = t
        .token
        .update_agreement_data(&forged, &flow_id, "any", Some(vec![1]))
        .unwrap_err();
    assert_eq!(err.reason(), "SuperToken: unauthorized agreement storage access");

    assert_eq!(t.token.snapshot().unwrap(), before);
    assert_eq!(t.token.get_account_active_agreements(&alice()), &[flow_id]);
    assert_eq!(t.token.realtime_balance_of(&bob(), 4).unwrap(), tokens(4));
    t.validate_system(4);
}

#[test]
fn transfer_available_amount() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);
    t.token
        .transfer(&alice(), &bob(), wei(WAD / 2), 2)
        .unwrap();

    assert_eq!(t.token.balance_of(&alice(), 2).unwrap(), wei(WAD + WAD / 2));
    assert_eq!(t.token.balance_of(&bob(), 2).unwrap(), wei(WAD / 2));
    t.validate_system(2);
}

#[test]
fn transfer_unavailable_balance() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 1);
    let err = t
        .token
        .transfer(&alice(), &bob(), tokens(2).checked_add(wei(1)).unwrap(), 2)
        .unwrap_err();
    assert_eq!(err.reason(), "transfer amount exceeds balance");
    assert_eq!(t.token.settled_entry(&alice()).settled_balance, tokens(2));
    t.validate_system(2);
}

#[test]
fn transfer_flow_balance() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(2), 0);
    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 0)
        .unwrap();

    assert_eq!(t.token.realtime_balance_of(&bob(), 2).unwrap(), tokens(2));
    assert!(t.token.realtime_balance_of(&alice(), 2).unwrap().is_zero());

    let bob_balance = t.token.balance_of(&bob(), 2).unwrap();
    t.token.transfer(&bob(), &carol(), bob_balance, 2).unwrap();
    assert_eq!(t.token.realtime_balance_of(&carol(), 2).unwrap(), tokens(2));
    assert!(t.token.realtime_balance_of(&bob(), 2).unwrap().is_zero());
    t.validate_system(2);
}

#[test]
fn streamed_funds_cannot_be_spent_before_they_accrue() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(10), 0);
    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 0)
        .unwrap();
    let before = t.token.snapshot().unwrap();

    let err = t.token.transfer(&bob(), &carol(), tokens(4), 3).unwrap_err();
    assert!(matches!(err, SuperTokenError::InsufficientBalance { .. }));
    assert_eq!(t.token.snapshot().unwrap(), before);
    t.validate_system(3);
}

#[test]
fn approve_amount() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(INIT_BALANCE), 1);
    let full = t.token.balance_of(&alice(), 1).unwrap();

    t.token.approve(&alice(), &bob(), full).unwrap();
    assert_eq!(t.token.allowance(&alice(), &bob()), full);

    let half = tokens(INIT_BALANCE / 2);
    t.token.approve(&alice(), &bob(), half).unwrap();
    assert_eq!(t.token.allowance(&alice(), &bob()), half);

    t.token.approve(&alice(), &bob(), FixedPointValue::ZERO).unwrap();
    assert!(t.token.allowance(&alice(), &bob()).is_zero());
}

#[test]
fn transfer_from_consumes_allowance() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(INIT_BALANCE), 1);
    let full = t.token.balance_of(&alice(), 1).unwrap();
    t.token.approve(&alice(), &bob(), full).unwrap();

    t.token
        .transfer_from(&bob(), &alice(), &bob(), full, 2)
        .unwrap();
    assert_eq!(t.token.balance_of(&bob(), 2).unwrap(), full);
    assert!(t.token.allowance(&alice(), &bob()).is_zero());

    let err = t
        .token
        .transfer_from(&bob(), &alice(), &bob(), wei(1), 2)
        .unwrap_err();
    assert_eq!(err.reason(), "transfer amount exceeds balance");
    t.validate_system(2);
}

#[test]
fn transfer_from_beyond_allowance_fails() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(5), 1);
    t.token.approve(&alice(), &bob(), tokens(1)).unwrap();

    let err = t
        .token
        .transfer_from(&bob(), &alice(), &carol(), tokens(2), 2)
        .unwrap_err();
    assert!(matches!(err, SuperTokenError::InsufficientAllowance { .. }));
    assert_eq!(t.token.allowance(&alice(), &bob()), tokens(1));
    assert_eq!(t.token.balance_of(&alice(), 2).unwrap(), tokens(5));
}

#[test]
fn debit_beyond_settled_balance_fails() {
    let mut t = Tester::new();
    t.token.credit(&alice(), tokens(2), 0).unwrap();
    let err = t.token.debit(&alice(), tokens(3), 1).unwrap_err();
    assert!(matches!(err, SuperTokenError::InsufficientBalance { .. }));
    assert_eq!(t.token.settled_entry(&alice()).settled_balance, tokens(2));
}

#[test]
fn two_flows_into_one_account_add_up() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(50), 0);
    t.upgrade(&carol(), tokens(50), 0);
    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 0)
        .unwrap();
    t.flow
        .update_flow(&mut t.token, &Caller::account("carol"), &carol(), &bob(), tokens(2), 5)
        .unwrap();

    // 1/s for 10s plus 2/s for 5s
    assert_eq!(t.token.realtime_balance_of(&bob(), 10).unwrap(), tokens(20));
    assert_eq!(t.token.realtime_balance_of(&alice(), 10).unwrap(), tokens(40));
    assert_eq!(t.token.realtime_balance_of(&carol(), 10).unwrap(), tokens(40));
    assert_eq!(t.flow.net_flow_rate(&t.token, &bob()).unwrap(), tokens(3));
    assert_eq!(t.flow.flows(&t.token).unwrap().len(), 2);
    t.validate_system(10);
}

#[test]
fn overdrawn_sender_goes_negative_but_books_balance() {
    let mut t = Tester::new();
    t.upgrade(&alice(), tokens(1), 0);
    t.flow
        .update_flow(&mut t.token, &Caller::account("alice"), &alice(), &bob(), tokens(1), 0)
        .unwrap();

    assert_eq!(t.token.realtime_balance_of(&alice(), 3).unwrap(), tokens(-2));
    assert_eq!(t.token.realtime_balance_of(&bob(), 3).unwrap(), tokens(3));
    t.validate_system(3);
}
