//! BDD scenarios for repeated flush campaigns.

use rstest_bdd_macros::scenario;

use super::test_helpers::{CampaignContext, campaign_context};

#[scenario(
    path = "tests/features/campaign.feature",
    name = "A campaign runs every pass with the delay between them"
)]
fn scenario_scheduled_campaign(campaign_context: CampaignContext) {
    drop(campaign_context);
}

#[scenario(
    path = "tests/features/campaign.feature",
    name = "Cancelling during the wait ends the campaign"
)]
fn scenario_cancel_during_wait(campaign_context: CampaignContext) {
    drop(campaign_context);
}

#[scenario(
    path = "tests/features/campaign.feature",
    name = "A campaign with no runs is rejected"
)]
fn scenario_zero_runs(campaign_context: CampaignContext) {
    drop(campaign_context);
}
