//! Benchmarks for the hot billing paths: schedule generation and the
//! command dispatch pipeline (load → rehydrate → handle → append).

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use coursepay_billing::{
    Enrollment, EnrollmentCommand, EnrollmentId, OpenEnrollment, RecordChargeSuccess, SelectPlan,
    generate_schedule,
};
use coursepay_catalog::{BillingFrequency, PlanTemplate, PlanTemplateId, PlanType, ProductId};
use coursepay_core::{AggregateId, Currency, TenantId};
use coursepay_events::{EventEnvelope, InMemoryEventBus};
use coursepay_infra::command_dispatcher::CommandDispatcher;
use coursepay_infra::event_store::InMemoryEventStore;

fn deposit_template(count: u32) -> PlanTemplate {
    PlanTemplate {
        id: PlanTemplateId::new(),
        name: "bench".to_string(),
        plan_type: PlanType::DepositInstallments,
        deposit_amount: Some(50_00),
        installment_count: Some(count),
        frequency: Some(BillingFrequency::Monthly),
        period_amount: None,
        currency: Currency::usd(),
        active: true,
    }
}

fn bench_schedule_generation(c: &mut Criterion) {
    let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let template = deposit_template(12);

    c.bench_function("generate_schedule_12_installments", |b| {
        b.iter(|| generate_schedule(black_box(&template), black_box(2500_00), black_box(anchor)))
    });
}

fn bench_dispatch_charge(c: &mut Criterion) {
    let anchor = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let template = deposit_template(12);

    c.bench_function("dispatch_charge_on_selected_plan", |b| {
        b.iter_with_setup(
            || {
                let dispatcher = CommandDispatcher::new(
                    Arc::new(InMemoryEventStore::new()),
                    Arc::new(InMemoryEventBus::<EventEnvelope<serde_json::Value>>::new()),
                );
                let tenant_id = TenantId::new();
                let aggregate_id = AggregateId::new();
                let enrollment_id = EnrollmentId::new(aggregate_id);

                dispatcher
                    .dispatch::<Enrollment>(
                        tenant_id,
                        aggregate_id,
                        "billing.enrollment",
                        EnrollmentCommand::OpenEnrollment(OpenEnrollment {
                            tenant_id,
                            enrollment_id,
                            product_id: ProductId::new(),
                            total_amount: 2500_00,
                            currency: Currency::usd(),
                            anchor_date: Some(anchor),
                            linked_parent: false,
                            occurred_at: anchor,
                        }),
                        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
                    )
                    .unwrap();

                let specs = generate_schedule(&template, 2500_00, anchor).unwrap();
                dispatcher
                    .dispatch::<Enrollment>(
                        tenant_id,
                        aggregate_id,
                        "billing.enrollment",
                        EnrollmentCommand::SelectPlan(SelectPlan {
                            tenant_id,
                            enrollment_id,
                            plan_template_id: template.id,
                            plan_type: template.plan_type,
                            obligations: specs,
                            total_amount: 2500_00,
                            occurred_at: anchor,
                        }),
                        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
                    )
                    .unwrap();

                (dispatcher, tenant_id, aggregate_id, enrollment_id)
            },
            |(dispatcher, tenant_id, aggregate_id, enrollment_id)| {
                dispatcher
                    .dispatch::<Enrollment>(
                        tenant_id,
                        aggregate_id,
                        "billing.enrollment",
                        EnrollmentCommand::RecordChargeSuccess(RecordChargeSuccess {
                            tenant_id,
                            enrollment_id,
                            payment_number: 1,
                            method_ref: None,
                            processor_charge_id: "pi_bench".to_string(),
                            processor_invoice_id: None,
                            occurred_at: anchor,
                        }),
                        |_t, id| Enrollment::empty(EnrollmentId::new(id)),
                    )
                    .unwrap()
            },
        )
    });
}

criterion_group!(benches, bench_schedule_generation, bench_dispatch_charge);
criterion_main!(benches);
