mod common;

use std::sync::atomic::Ordering;

use anyhow::Result;
use common::{Clinic, FlakyLedger, test_ledger, test_service};
use rxledger::application::PrescriptionService;
use rxledger::domain::{
    AssetFilter, BalanceFilter, FillStatus, Ledger, Lookup, TransactionTemplate,
};

#[tokio::test]
async fn test_refill_scenario_two_fills() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let asset_id = clinic
        .prescribe(&service, "patient-1", "Atorvastatin", 2, 30)
        .await?;

    clinic.fill(&service, asset_id, 30).await?;
    let history = service.patient_history("patient-1").await?;
    assert_eq!(history[0].filled(), 30);
    assert_eq!(history[0].outstanding(), 60);

    clinic.fill(&service, asset_id, 30).await?;
    let history = service.patient_history("patient-1").await?;
    assert_eq!(history.len(), 1);
    let entry = &history[0];
    assert_eq!(entry.asset.id, asset_id);
    assert_eq!(entry.total_issued(), 90);
    assert_eq!(entry.filled, Lookup::Found(60));
    assert_eq!(entry.outstanding, Lookup::Found(30));
    assert_eq!(entry.status(), FillStatus::PartiallyFilled);

    Ok(())
}

#[tokio::test]
async fn test_fully_filled_has_no_balance_record() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let asset_id = clinic
        .prescribe(&service, "patient-1", "Atorvastatin", 2, 30)
        .await?;
    for _ in 0..3 {
        clinic.fill(&service, asset_id, 30).await?;
    }

    let balances = service
        .ledger()
        .query_balances(&BalanceFilter::by_asset(asset_id))
        .await?;
    assert!(balances.is_empty());

    let history = service.patient_history("patient-1").await?;
    let entry = &history[0];
    assert_eq!(entry.outstanding, Lookup::NotFound);
    assert_eq!(entry.outstanding(), 0);
    assert_eq!(entry.filled(), 90);
    assert_eq!(entry.status(), FillStatus::FullyFilled);

    Ok(())
}

#[tokio::test]
async fn test_unfilled_prescription_is_outstanding() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    clinic
        .prescribe(&service, "patient-1", "Levothyroxine", 1, 30)
        .await?;

    let history = service.patient_history("patient-1").await?;
    assert_eq!(history[0].filled, Lookup::NotFound);
    assert_eq!(history[0].outstanding, Lookup::Found(60));
    assert_eq!(history[0].status(), FillStatus::Outstanding);

    Ok(())
}

#[tokio::test]
async fn test_history_is_per_patient_in_issue_order() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let first = clinic
        .prescribe(&service, "patient-1", "Amoxicillin", 0, 21)
        .await?;
    clinic
        .prescribe(&service, "patient-10", "Insulin", 3, 10)
        .await?;
    let second = clinic
        .prescribe(&service, "patient-1", "Ibuprofen", 1, 20)
        .await?;

    let history = service.patient_history("patient-1").await?;
    let ids: Vec<_> = history.iter().map(|e| e.asset.id).collect();
    assert_eq!(ids, vec![first, second]);

    // Exact match only
    assert!(service.patient_history("patient").await?.is_empty());
    assert!(service.patient_history("nobody").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_history_queries_are_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let a = clinic
        .prescribe(&service, "patient-1", "Amoxicillin", 0, 21)
        .await?;
    let b = clinic
        .prescribe(&service, "patient-1", "Ibuprofen", 2, 20)
        .await?;
    clinic.fill(&service, a, 7).await?;
    clinic.fill(&service, b, 20).await?;

    let first = service.patient_history("patient-1").await?;
    let second = service.patient_history("patient-1").await?;
    assert_eq!(first, second);

    Ok(())
}

#[tokio::test]
async fn test_control_outputs_on_fill_transactions_are_not_counted() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let asset_id = clinic
        .prescribe(&service, "patient-1", "Prednisone", 0, 50)
        .await?;

    // Spend 50, retire 20 and put the remaining 30 back under the pharmacy's control
    let partial = TransactionTemplate::new()
        .spend_from_account(Clinic::PHARMACY, asset_id, 50)
        .retire(asset_id, 20)
        .control_with_account(Clinic::PHARMACY, asset_id, 30)
        .sign(&clinic.pharmacy_key);
    service.ledger().submit(partial).await?;

    let history = service.patient_history("patient-1").await?;
    assert_eq!(history[0].filled(), 20);
    assert_eq!(history[0].outstanding(), 30);

    Ok(())
}

#[tokio::test]
async fn test_asset_never_issued_is_unaccounted() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    // Asset created but the issuance never submitted
    service
        .ledger()
        .create_asset(
            &clinic.definition("patient-1", "Warfarin", 0, 30),
            &clinic.provider_key,
        )
        .await?;

    let history = service.patient_history("patient-1").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outstanding, Lookup::NotFound);
    assert_eq!(history[0].filled, Lookup::NotFound);
    assert_eq!(history[0].status(), FillStatus::Unaccounted);

    Ok(())
}

#[tokio::test]
async fn test_failed_sub_queries_do_not_abort_history() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let service = PrescriptionService::new(FlakyLedger::new(ledger));
    let clinic = Clinic::setup(&service).await?;

    let a = clinic
        .prescribe(&service, "patient-1", "Amoxicillin", 0, 21)
        .await?;
    clinic
        .prescribe(&service, "patient-1", "Ibuprofen", 1, 20)
        .await?;
    clinic.fill(&service, a, 7).await?;

    service
        .ledger()
        .fail_balances
        .store(true, Ordering::SeqCst);
    let history = service.patient_history("patient-1").await?;
    assert_eq!(history.len(), 2);
    for entry in &history {
        assert!(entry.outstanding.is_failed());
        assert_eq!(entry.outstanding(), 0);
        assert_eq!(entry.status(), FillStatus::Unknown);
    }
    assert_eq!(history[0].filled, Lookup::Found(7));
    assert_eq!(history[1].filled, Lookup::NotFound);

    service
        .ledger()
        .fail_balances
        .store(false, Ordering::SeqCst);
    service
        .ledger()
        .fail_transactions
        .store(true, Ordering::SeqCst);
    let history = service.patient_history("patient-1").await?;
    assert!(history[0].filled.is_failed());
    assert_eq!(history[0].outstanding, Lookup::Found(14));
    assert_eq!(history[1].outstanding, Lookup::Found(40));

    Ok(())
}

#[tokio::test]
async fn test_definition_is_returned_unchanged() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let clinic = Clinic::setup(&service).await?;

    let definition = clinic.definition("patient-3", "Metoprolol", 4, 60);
    clinic
        .prescribe(&service, "patient-3", "Metoprolol", 4, 60)
        .await?;

    let history = service.patient_history("patient-3").await?;
    assert_eq!(history[0].asset.definition, definition);

    let by_patient = service
        .ledger()
        .query_assets(&AssetFilter::by_patient("patient-3"))
        .await?;
    assert_eq!(by_patient[0], history[0].asset);

    Ok(())
}
