//! Integration test: invite-gated registration and operator broadcasts.
//!
//! 1. A redeemed invite makes the user a recipient of the next wave
//! 2. A registered user presenting another invite burns it
//! 3. A broadcast reaches every registered user, operators included

use ticketwave_delivery::Notice;
use ticketwave_integration_tests::{recipient, Harness, OPERATOR};
use ticketwave_pool::{Directory, InviteStats, Invites, Redemption};
use ticketwave_types::{now_millis, UserId};

#[tokio::test(start_paused = true)]
async fn test_invited_user_receives_ticket() {
    let h = Harness::new(1).await;
    let invites = Invites::new(h.db.clone());
    let codes = invites.generate(2, now_millis()).await.expect("generate");

    let newcomer = UserId(700);
    let outcome = invites
        .redeem(newcomer, Some("@newcomer"), &codes[0], now_millis())
        .await
        .expect("redeem");
    assert_eq!(outcome, Redemption::Registered);
    assert_eq!(
        h.directory.eligible_recipients().await.expect("recipients"),
        vec![recipient(0), newcomer]
    );

    h.start_wave(&["a", "b"]).await;
    let report = h.engine.run().await.expect("run");
    assert_eq!(report.sent, 2);
    assert!(h.transport.delivered().iter().any(|(to, _)| *to == newcomer));

    assert_eq!(
        invites.stats().await.expect("stats"),
        InviteStats { total: 2, unused: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_invite_burned_and_operators_told() {
    let h = Harness::new(1).await;
    let invites = Invites::new(h.db.clone());
    let code = invites.generate(1, now_millis()).await.expect("generate").remove(0);

    let outcome = invites
        .redeem(recipient(0), Some("user0"), &code, now_millis())
        .await
        .expect("redeem");
    assert_eq!(outcome, Redemption::AlreadyRegistered { burned: true });

    let notice = Notice::SecondInvite {
        user_id: recipient(0),
        code: code.clone(),
    };
    h.engine.notify_operators(&notice, None).await;
    let messages = h.transport.messages();
    assert_eq!(messages, vec![(OPERATOR, notice.to_string())]);

    // The burned code is gone for everyone else too.
    let outcome = invites
        .redeem(UserId(701), Some("other"), &code, now_millis())
        .await
        .expect("redeem burned");
    assert_eq!(outcome, Redemption::AlreadyUsed);
    assert!(h.directory.recipient(UserId(701)).await.expect("lookup").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_operators_and_recipients() {
    let h = Harness::new(2).await;
    let report = h.engine.broadcast("Wave starts tonight").await.expect("broadcast");
    assert_eq!(report.recipients, 3);
    assert_eq!(report.sent, 3);

    let to: Vec<UserId> = h.transport.messages().into_iter().map(|(u, _)| u).collect();
    assert_eq!(to, vec![OPERATOR, recipient(0), recipient(1)]);
}
