//! Postgres-backed repository for every domain aggregate, plus the
//! two stored-procedure invocations (`recalc_lead_scores`,
//! `recalc_lead_intent`) that are the sole writers of the derived score
//! and intent columns. One `Store` struct grouped by aggregate, the same
//! shape as the teacher's `adapters::PostgresStore`, using hand-written
//! `sqlx::query` + `Row::get` rather than the `query!` macro family so the
//! crate doesn't need a live database at compile time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    ActionConfig, ActionType, Attribution, AutomationRule, Conditions, Deal, DealStatus,
    Intent, IntentSignal, IntentSummary, Lead, LeadIdentifier, LeadStatus, LifecycleStage,
    MarketingEvent, Organization, Pipeline, PipelineStage, PromotedFields, RoutingStatus,
    RuleType, ScoreCategory, ScoreHistory, ScoringRule, StageAutomationEntry, StageType, Task,
    TaskStatus, TriggerConfig, TriggerType,
};
use crate::error::Result;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!("connected to postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("migrations applied");
        Ok(())
    }

    // ==================== Leads ====================

    fn lead_from_row(row: &sqlx::postgres::PgRow) -> Result<Lead> {
        let status: String = row.get("status");
        let lifecycle_stage: String = row.get("lifecycle_stage");
        let routing_status: String = row.get("routing_status");
        let primary_intent: Option<String> = row.get("primary_intent");

        Ok(Lead {
            id: row.get("id"),
            email: row.get("email"),
            portal_id: row.get("portal_id"),
            linkedin_url: row.get("linkedin_url"),
            waalaxy_id: row.get("waalaxy_id"),
            lemlist_id: row.get("lemlist_id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            phone: row.get("phone"),
            job_title: row.get("job_title"),
            status: status.parse::<LeadStatus>()?,
            lifecycle_stage: lifecycle_stage.parse::<LifecycleStage>()?,
            demographic_score: row.get("demographic_score"),
            engagement_score: row.get("engagement_score"),
            behavior_score: row.get("behavior_score"),
            total_score: row.get("total_score"),
            routing_status: routing_status.parse::<RoutingStatus>()?,
            pipeline_id: row.get("pipeline_id"),
            primary_intent: primary_intent.map(|s| s.parse::<Intent>()).transpose()?,
            intent_confidence: row.get("intent_confidence"),
            intent_summary: IntentSummary {
                research: row.get("intent_research"),
                b2b: row.get("intent_b2b"),
                co_creation: row.get("intent_co_creation"),
            },
            organization_id: row.get("organization_id"),
            first_touch: Attribution {
                source: row.get("first_touch_source"),
                campaign: row.get("first_touch_campaign"),
                date: row.get("first_touch_date"),
            },
            last_touch: Attribution {
                source: row.get("last_touch_source"),
                campaign: row.get("last_touch_campaign"),
                date: row.get("last_touch_date"),
            },
            gdpr_delete_requested: row.get("gdpr_delete_requested"),
            last_activity: row.get("last_activity"),
            routed_at: row.get("routed_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    const LEAD_COLUMNS: &'static str = r#"
        id, email, portal_id, linkedin_url, waalaxy_id, lemlist_id,
        first_name, last_name, phone, job_title,
        status, lifecycle_stage,
        demographic_score, engagement_score, behavior_score, total_score,
        routing_status, pipeline_id,
        primary_intent, intent_confidence, intent_research, intent_b2b, intent_co_creation,
        organization_id,
        first_touch_source, first_touch_campaign, first_touch_date,
        last_touch_source, last_touch_campaign, last_touch_date,
        gdpr_delete_requested, last_activity, routed_at, created_at, updated_at
    "#;

    pub async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        let row = sqlx::query(&format!("SELECT {} FROM leads WHERE id = $1", Self::LEAD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::lead_from_row).transpose()
    }

    /// Identity resolution: try email, then portal_id, waalaxy_id,
    /// linkedin_url, lemlist_id, in that order, the first match wins.
    #[instrument(skip(self, identifier))]
    pub async fn find_lead_by_identifier(&self, identifier: &LeadIdentifier) -> Result<Option<Lead>> {
        if let Some(email) = identifier.normalized_email() {
            if let Some(lead) = self.find_lead_by("lower(email)", &email).await? {
                return Ok(Some(lead));
            }
        }
        if let Some(portal_id) = &identifier.portal_id {
            if let Some(lead) = self.find_lead_by("portal_id", portal_id).await? {
                return Ok(Some(lead));
            }
        }
        if let Some(waalaxy_id) = &identifier.waalaxy_id {
            if let Some(lead) = self.find_lead_by("waalaxy_id", waalaxy_id).await? {
                return Ok(Some(lead));
            }
        }
        if let Some(linkedin_url) = &identifier.linkedin_url {
            if let Some(lead) = self.find_lead_by("linkedin_url", linkedin_url).await? {
                return Ok(Some(lead));
            }
        }
        if let Some(lemlist_id) = &identifier.lemlist_id {
            if let Some(lead) = self.find_lead_by("lemlist_id", lemlist_id).await? {
                return Ok(Some(lead));
            }
        }
        Ok(None)
    }

    async fn find_lead_by(&self, column_expr: &str, value: &str) -> Result<Option<Lead>> {
        let sql = format!("SELECT {} FROM leads WHERE {} = $1", Self::LEAD_COLUMNS, column_expr);
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::lead_from_row).transpose()
    }

    /// Create a new lead on identity-resolution miss, with first-touch
    /// attribution set from the triggering event.
    pub async fn create_lead(&self, identifier: &LeadIdentifier, first_touch: &Attribution) -> Result<Lead> {
        let email = identifier
            .normalized_email()
            .unwrap_or_else(|| format!("unknown+{}@no-email.invalid", Uuid::new_v4()));

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO leads (
                email, portal_id, linkedin_url, waalaxy_id, lemlist_id,
                status, lifecycle_stage, routing_status,
                first_touch_source, first_touch_campaign, first_touch_date,
                last_touch_source, last_touch_campaign, last_touch_date
            )
            VALUES ($1, $2, $3, $4, $5, 'new', 'lead', 'unrouted', $6, $7, $8, $6, $7, $8)
            RETURNING {}
            "#,
            Self::LEAD_COLUMNS
        ))
        .bind(&email)
        .bind(&identifier.portal_id)
        .bind(&identifier.linkedin_url)
        .bind(&identifier.waalaxy_id)
        .bind(&identifier.lemlist_id)
        .bind(&first_touch.source)
        .bind(&first_touch.campaign)
        .bind(first_touch.date)
        .fetch_one(&self.pool)
        .await?;

        Self::lead_from_row(&row)
    }

    /// Fill any nullable external id / profile field on hit — coalesce
    /// semantics, never overwrite.
    pub async fn coalesce_lead_fields(
        &self,
        lead_id: Uuid,
        identifier: &LeadIdentifier,
        first_name: Option<&str>,
        last_name: Option<&str>,
        phone: Option<&str>,
        job_title: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads SET
                portal_id = COALESCE(portal_id, $2),
                linkedin_url = COALESCE(linkedin_url, $3),
                waalaxy_id = COALESCE(waalaxy_id, $4),
                lemlist_id = COALESCE(lemlist_id, $5),
                first_name = COALESCE(first_name, $6),
                last_name = COALESCE(last_name, $7),
                phone = COALESCE(phone, $8),
                job_title = COALESCE(job_title, $9),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(&identifier.portal_id)
        .bind(&identifier.linkedin_url)
        .bind(&identifier.waalaxy_id)
        .bind(&identifier.lemlist_id)
        .bind(first_name)
        .bind(last_name)
        .bind(phone)
        .bind(job_title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link an organization to a lead only if it doesn't already have one.
    pub async fn set_lead_organization_if_absent(&self, lead_id: Uuid, organization_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE leads SET organization_id = COALESCE(organization_id, $2), updated_at = now() WHERE id = $1",
        )
        .bind(lead_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update last-touch always; set first-touch only if currently null.
    pub async fn update_attribution(&self, lead_id: Uuid, touch: &Attribution) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads SET
                last_touch_source = $2, last_touch_campaign = $3, last_touch_date = $4,
                first_touch_source = COALESCE(first_touch_source, $2),
                first_touch_campaign = COALESCE(first_touch_campaign, $3),
                first_touch_date = COALESCE(first_touch_date, $4),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(&touch.source)
        .bind(&touch.campaign)
        .bind(touch.date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_last_activity(&self, lead_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE leads SET last_activity = now(), updated_at = now() WHERE id = $1")
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_routing_status(&self, lead_id: Uuid, status: RoutingStatus) -> Result<()> {
        sqlx::query("UPDATE leads SET routing_status = $2, updated_at = now() WHERE id = $1")
            .bind(lead_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition to `routed`: set pipeline, status, and `routed_at`
    /// together.
    pub async fn mark_routed(&self, lead_id: Uuid, pipeline_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE leads
            SET pipeline_id = $2, routing_status = 'routed', routed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(pipeline_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `update_field` automation action — the caller is responsible for
    /// checking `UPDATE_FIELD_SAFELIST` before calling this.
    pub async fn update_lead_field(&self, lead_id: Uuid, field: &str, value: &serde_json::Value) -> Result<()> {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let sql = format!("UPDATE leads SET {field} = $2, updated_at = now() WHERE id = $1");
        sqlx::query(&sql).bind(lead_id).bind(text).execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Organizations ====================

    fn organization_from_row(row: &sqlx::postgres::PgRow) -> Organization {
        Organization {
            id: row.get("id"),
            name: row.get("name"),
            domain: row.get("domain"),
            industry: row.get("industry"),
            size: row.get("size"),
            country: row.get("country"),
            portal_id: row.get("portal_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    pub async fn find_organization_by_domain(&self, domain: &str) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, domain, industry, size, country, portal_id, created_at, updated_at FROM organizations WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::organization_from_row))
    }

    pub async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name, domain, industry, size, country, portal_id, created_at, updated_at FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::organization_from_row))
    }

    /// Find-or-create by domain.
    pub async fn find_or_create_organization(&self, name: &str, domain: Option<&str>) -> Result<Organization> {
        if let Some(domain) = domain {
            if let Some(org) = self.find_organization_by_domain(domain).await? {
                return Ok(org);
            }
        }
        let row = sqlx::query(
            r#"
            INSERT INTO organizations (name, domain)
            VALUES ($1, $2)
            ON CONFLICT (domain) WHERE domain IS NOT NULL DO UPDATE SET updated_at = now()
            RETURNING id, name, domain, industry, size, country, portal_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(domain)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::organization_from_row(&row))
    }

    // ==================== Events ====================

    fn event_from_row(row: &sqlx::postgres::PgRow) -> MarketingEvent {
        MarketingEvent {
            id: row.get("id"),
            lead_id: row.get("lead_id"),
            event_type: row.get("event_type"),
            event_category: row.get("event_category"),
            source: row.get("source"),
            occurred_at: row.get("occurred_at"),
            metadata: row.get("metadata"),
            campaign_id: row.get("campaign_id"),
            utm_source: row.get("utm_source"),
            utm_medium: row.get("utm_medium"),
            utm_campaign: row.get("utm_campaign"),
            utm_content: row.get("utm_content"),
            utm_term: row.get("utm_term"),
            correlation_id: row.get("correlation_id"),
            score_points: row.get("score_points"),
            score_category: row.get("score_category"),
            processed_at: row.get("processed_at"),
            created_at: row.get("created_at"),
        }
    }

    const EVENT_COLUMNS: &'static str = r#"
        id, lead_id, event_type, event_category, source, occurred_at, metadata,
        campaign_id, utm_source, utm_medium, utm_campaign, utm_content, utm_term,
        correlation_id, score_points, score_category, processed_at, created_at
    "#;

    /// Idempotency lookup: a MarketingEvent already exists for
    /// `(source, correlation_id)`.
    pub async fn find_event_by_correlation(&self, source: &str, correlation_id: &str) -> Result<Option<MarketingEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM events WHERE source = $1 AND correlation_id = $2",
            Self::EVENT_COLUMNS
        ))
        .bind(source)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::event_from_row))
    }

    /// Preliminary insert at ingest time: `processed_at IS NULL`, empty
    /// score columns. `lead_id` is nullable — identity resolution hasn't
    /// run yet at ingest time.
    pub async fn insert_preliminary_event(
        &self,
        id: Uuid,
        lead_id: Option<Uuid>,
        event_type: &str,
        source: &str,
        occurred_at: DateTime<Utc>,
        metadata: &serde_json::Value,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, lead_id, event_type, source, occurred_at, metadata, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(lead_id)
        .bind(event_type)
        .bind(source)
        .bind(occurred_at)
        .bind(metadata)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_event(&self, id: Uuid) -> Result<Option<MarketingEvent>> {
        let row = sqlx::query(&format!("SELECT {} FROM events WHERE id = $1", Self::EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::event_from_row))
    }

    /// Promote known metadata keys into dedicated columns, stripping them
    /// from the stored `metadata` blob.
    pub async fn promote_event_fields(&self, id: Uuid, lead_id: Uuid, promoted: &PromotedFields, remaining_metadata: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events SET
                lead_id = $2,
                event_category = COALESCE($3, event_category),
                campaign_id = $4, utm_source = $5, utm_medium = $6, utm_campaign = $7,
                utm_content = $8, utm_term = $9, metadata = $10
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(lead_id)
        .bind(&promoted.event_category)
        .bind(&promoted.campaign_id)
        .bind(&promoted.utm_source)
        .bind(&promoted.utm_medium)
        .bind(&promoted.utm_campaign)
        .bind(&promoted.utm_content)
        .bind(&promoted.utm_term)
        .bind(remaining_metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_event_processed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE events SET processed_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump `score_points`/`score_category` for the *first* matched rule
    /// only — subsequent matches don't overwrite.
    pub async fn set_event_score_category_if_unset(&self, id: Uuid, points: i32, category: ScoreCategory) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET score_points = score_points + $2,
                score_category = COALESCE(score_category, $3)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(points)
        .bind(category.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Score history ====================

    /// Rows for `(lead, rule)` created within the last 24h — `max_per_day` cap.
    pub async fn score_history_count_today(&self, lead_id: Uuid, rule_id: Uuid) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM score_history WHERE lead_id = $1 AND rule_id = $2 AND created_at > now() - interval '24 hours'",
        )
        .bind(lead_id)
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// All-time rows for `(lead, rule)` — `max_per_lead` cap.
    pub async fn score_history_count_all_time(&self, lead_id: Uuid, rule_id: Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM score_history WHERE lead_id = $1 AND rule_id = $2")
            .bind(lead_id)
            .bind(rule_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_score_history(
        &self,
        lead_id: Uuid,
        event_id: Option<Uuid>,
        rule_id: Uuid,
        category: ScoreCategory,
        points_change: i32,
        current_total_hint: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO score_history (lead_id, event_id, rule_id, category, points_change, new_total, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(lead_id)
        .bind(event_id)
        .bind(rule_id)
        .bind(category.as_str())
        .bind(points_change)
        .bind(current_total_hint + points_change)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// The stored recalc primitive: sole writer of the three category
    /// columns and `total_score`. Locks the lead row for the duration of
    /// the recompute.
    pub async fn recalc_lead_scores(&self, lead_id: Uuid) -> Result<()> {
        sqlx::query("SELECT recalc_lead_scores($1)").bind(lead_id).execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Intent signals ====================

    pub async fn insert_intent_signal(
        &self,
        lead_id: Uuid,
        intent: Intent,
        rule_id: &str,
        confidence_points: i32,
        trigger_type: &str,
        event_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            INSERT INTO intent_signals (lead_id, intent, rule_id, confidence_points, trigger_type, event_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(lead_id)
        .bind(intent.as_str())
        .bind(rule_id)
        .bind(confidence_points)
        .bind(trigger_type)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// Stored recalc primitive for the intent summary, argmax, and
    /// confidence.
    pub async fn recalc_lead_intent(&self, lead_id: Uuid) -> Result<()> {
        sqlx::query("SELECT recalc_lead_intent($1)").bind(lead_id).execute(&self.pool).await?;
        Ok(())
    }

    #[allow(dead_code)]
    fn intent_signal_from_row(row: &sqlx::postgres::PgRow) -> Result<IntentSignal> {
        let intent: String = row.get("intent");
        Ok(IntentSignal {
            id: row.get("id"),
            lead_id: row.get("lead_id"),
            intent: intent.parse()?,
            rule_id: row.get("rule_id"),
            confidence_points: row.get("confidence_points"),
            trigger_type: row.get("trigger_type"),
            event_id: row.get("event_id"),
            expires_at: row.get("expires_at"),
            expired: row.get("expired"),
            detected_at: row.get("detected_at"),
        })
    }

    // ==================== Scoring rules ====================

    /// Load the active-rule snapshot: read once at worker start, reloaded
    /// wholesale on command.
    pub async fn load_active_scoring_rules(&self) -> Result<Vec<ScoringRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slug, category, rule_type, conditions, points, max_per_day, max_per_lead,
                   decay_days, is_active, priority, created_at
            FROM scoring_rules
            WHERE is_active
            ORDER BY priority ASC, created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let category: String = row.get("category");
                let rule_type: String = row.get("rule_type");
                let conditions_json: serde_json::Value = row.get("conditions");
                Ok(ScoringRule {
                    id: row.get("id"),
                    slug: row.get("slug"),
                    category: category.parse()?,
                    rule_type: if rule_type == "event" { RuleType::Event } else { RuleType::Field },
                    conditions: serde_json::from_value::<Conditions>(conditions_json)?,
                    points: row.get("points"),
                    max_per_day: row.get("max_per_day"),
                    max_per_lead: row.get("max_per_lead"),
                    decay_days: row.get("decay_days"),
                    is_active: row.get("is_active"),
                    priority: row.get("priority"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    // ==================== Automation rules ====================

    pub async fn load_active_automation_rules(&self) -> Result<Vec<AutomationRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, trigger_type, trigger_config, action_type, action_config,
                   priority, is_active, execution_count, last_executed, created_at
            FROM automation_rules
            WHERE is_active
            ORDER BY priority ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let trigger_type: String = row.get("trigger_type");
                let action_type: String = row.get("action_type");
                let trigger_config_json: serde_json::Value = row.get("trigger_config");
                let action_config_json: serde_json::Value = row.get("action_config");
                Ok(AutomationRule {
                    id: row.get("id"),
                    trigger_type: parse_trigger_type(&trigger_type)?,
                    trigger_config: serde_json::from_value::<TriggerConfig>(trigger_config_json)?,
                    action_type: parse_action_type(&action_type)?,
                    action_config: serde_json::from_value::<ActionConfig>(action_config_json)?,
                    priority: row.get("priority"),
                    is_active: row.get("is_active"),
                    execution_count: row.get("execution_count"),
                    last_executed: row.get("last_executed"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    pub async fn record_automation_execution(&self, rule_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE automation_rules SET execution_count = execution_count + 1, last_executed = now() WHERE id = $1",
        )
        .bind(rule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Pipelines ====================

    /// Static configuration, read once at worker startup.
    pub async fn load_pipelines(&self) -> Result<Vec<Pipeline>> {
        let pipeline_rows = sqlx::query("SELECT id, slug, is_default FROM pipelines")
            .fetch_all(&self.pool)
            .await?;

        let mut pipelines = Vec::with_capacity(pipeline_rows.len());
        for prow in &pipeline_rows {
            let pipeline_id: Uuid = prow.get("id");
            let stage_rows = sqlx::query(
                "SELECT id, pipeline_id, slug, position, stage_type, automation_config FROM pipeline_stages WHERE pipeline_id = $1 ORDER BY position ASC",
            )
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;

            let mut stages = Vec::with_capacity(stage_rows.len());
            for srow in &stage_rows {
                let stage_type: String = srow.get("stage_type");
                let automation_json: serde_json::Value = srow.get("automation_config");
                stages.push(PipelineStage {
                    id: srow.get("id"),
                    pipeline_id: srow.get("pipeline_id"),
                    slug: srow.get("slug"),
                    position: srow.get("position"),
                    stage_type: parse_stage_type(&stage_type)?,
                    automation_config: serde_json::from_value::<Vec<StageAutomationEntry>>(automation_json)?,
                });
            }

            pipelines.push(Pipeline {
                id: pipeline_id,
                slug: prow.get("slug"),
                is_default: prow.get("is_default"),
                stages,
            });
        }
        Ok(pipelines)
    }

    // ==================== Deals ====================

    /// Create a deal in the pipeline's first stage, respecting the
    /// `(lead_id, pipeline_id)` uniqueness via `ON CONFLICT DO NOTHING` —
    /// a retry that races is a no-op.
    pub async fn create_deal_if_absent(&self, lead_id: Uuid, pipeline_id: Uuid, stage_id: Uuid) -> Result<Option<Deal>> {
        let next_position: i32 = sqlx::query("SELECT COALESCE(MAX(position), 0) + 1 AS next FROM deals WHERE stage_id = $1")
            .bind(stage_id)
            .fetch_one(&self.pool)
            .await?
            .get("next");

        let row = sqlx::query(
            r#"
            INSERT INTO deals (lead_id, pipeline_id, stage_id, position, status, stage_entered_at)
            VALUES ($1, $2, $3, $4, 'open', now())
            ON CONFLICT (lead_id, pipeline_id) DO NOTHING
            RETURNING id, lead_id, pipeline_id, stage_id, position, value, currency, status,
                      stage_entered_at, assigned_to, closed_at, created_at
            "#,
        )
        .bind(lead_id)
        .bind(pipeline_id)
        .bind(stage_id)
        .bind(next_position)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            Deal {
                id: r.get("id"),
                lead_id: r.get("lead_id"),
                pipeline_id: r.get("pipeline_id"),
                stage_id: r.get("stage_id"),
                position: r.get("position"),
                value: r.get::<Option<Decimal>, _>("value"),
                currency: r.get("currency"),
                status: match status.as_str() {
                    "won" => DealStatus::Won,
                    "lost" => DealStatus::Lost,
                    _ => DealStatus::Open,
                },
                stage_entered_at: r.get("stage_entered_at"),
                assigned_to: r.get("assigned_to"),
                closed_at: r.get("closed_at"),
                created_at: r.get("created_at"),
            }
        }))
    }

    /// Create the deal and flip the lead to `routed` in one transaction.
    /// A concurrent retry that races on the `(lead_id, pipeline_id)`
    /// uniqueness is a no-op: the existing deal is returned instead.
    pub async fn route_lead_into_pipeline(&self, lead_id: Uuid, pipeline_id: Uuid, stage_id: Uuid) -> Result<Deal> {
        let mut tx = self.pool.begin().await?;

        let next_position: i32 = sqlx::query("SELECT COALESCE(MAX(position), 0) + 1 AS next FROM deals WHERE stage_id = $1")
            .bind(stage_id)
            .fetch_one(&mut *tx)
            .await?
            .get("next");

        let inserted = sqlx::query(
            r#"
            INSERT INTO deals (lead_id, pipeline_id, stage_id, position, status, stage_entered_at)
            VALUES ($1, $2, $3, $4, 'open', now())
            ON CONFLICT (lead_id, pipeline_id) DO NOTHING
            RETURNING id, lead_id, pipeline_id, stage_id, position, value, currency, status,
                      stage_entered_at, assigned_to, closed_at, created_at
            "#,
        )
        .bind(lead_id)
        .bind(pipeline_id)
        .bind(stage_id)
        .bind(next_position)
        .fetch_optional(&mut *tx)
        .await?;

        let deal_row = match inserted {
            Some(row) => row,
            None => {
                sqlx::query(
                    r#"
                    SELECT id, lead_id, pipeline_id, stage_id, position, value, currency, status,
                           stage_entered_at, assigned_to, closed_at, created_at
                    FROM deals WHERE lead_id = $1 AND pipeline_id = $2
                    "#,
                )
                .bind(lead_id)
                .bind(pipeline_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query(
            r#"
            UPDATE leads
            SET pipeline_id = $2, routing_status = 'routed', routed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(pipeline_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let status: String = deal_row.get("status");
        Ok(Deal {
            id: deal_row.get("id"),
            lead_id: deal_row.get("lead_id"),
            pipeline_id: deal_row.get("pipeline_id"),
            stage_id: deal_row.get("stage_id"),
            position: deal_row.get("position"),
            value: deal_row.get::<Option<Decimal>, _>("value"),
            currency: deal_row.get("currency"),
            status: match status.as_str() {
                "won" => DealStatus::Won,
                "lost" => DealStatus::Lost,
                _ => DealStatus::Open,
            },
            stage_entered_at: deal_row.get("stage_entered_at"),
            assigned_to: deal_row.get("assigned_to"),
            closed_at: deal_row.get("closed_at"),
            created_at: deal_row.get("created_at"),
        })
    }

    pub async fn get_deal(&self, lead_id: Uuid, pipeline_id: Uuid) -> Result<Option<Deal>> {
        let row = sqlx::query(
            r#"
            SELECT id, lead_id, pipeline_id, stage_id, position, value, currency, status,
                   stage_entered_at, assigned_to, closed_at, created_at
            FROM deals WHERE lead_id = $1 AND pipeline_id = $2
            "#,
        )
        .bind(lead_id)
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let status: String = r.get("status");
            Deal {
                id: r.get("id"),
                lead_id: r.get("lead_id"),
                pipeline_id: r.get("pipeline_id"),
                stage_id: r.get("stage_id"),
                position: r.get("position"),
                value: r.get::<Option<Decimal>, _>("value"),
                currency: r.get("currency"),
                status: match status.as_str() {
                    "won" => DealStatus::Won,
                    "lost" => DealStatus::Lost,
                    _ => DealStatus::Open,
                },
                stage_entered_at: r.get("stage_entered_at"),
                assigned_to: r.get("assigned_to"),
                closed_at: r.get("closed_at"),
                created_at: r.get("created_at"),
            }
        }))
    }

    // ==================== Tasks ====================

    pub async fn create_task(
        &self,
        lead_id: Option<Uuid>,
        deal_id: Option<Uuid>,
        title: &str,
        due_date: DateTime<Utc>,
        automation_rule_id: Option<Uuid>,
    ) -> Result<Task> {
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (lead_id, deal_id, title, due_date, automation_rule_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, lead_id, deal_id, title, due_date, status, automation_rule_id, created_at
            "#,
        )
        .bind(lead_id)
        .bind(deal_id)
        .bind(title)
        .bind(due_date)
        .bind(automation_rule_id)
        .fetch_one(&self.pool)
        .await?;

        let status: String = row.get("status");
        Ok(Task {
            id: row.get("id"),
            lead_id: row.get("lead_id"),
            deal_id: row.get("deal_id"),
            title: row.get("title"),
            due_date: row.get("due_date"),
            status: match status.as_str() {
                "in_progress" => TaskStatus::InProgress,
                "completed" => TaskStatus::Completed,
                "cancelled" => TaskStatus::Cancelled,
                _ => TaskStatus::Open,
            },
            automation_rule_id: row.get("automation_rule_id"),
            created_at: row.get("created_at"),
        })
    }

    // ==================== Decay job ====================

    /// Flip `expired` on score_history / intent_signal rows whose
    /// `expires_at` has passed, and recalc the affected leads. Run by an
    /// external scheduled job, not the hot path.
    pub async fn expire_due_score_history(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE score_history SET expired = true, expired_at = now()
            WHERE NOT expired AND expires_at IS NOT NULL AND expires_at <= now()
            RETURNING lead_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("lead_id")).collect())
    }

    pub async fn expire_due_intent_signals(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE intent_signals SET expired = true
            WHERE NOT expired AND expires_at IS NOT NULL AND expires_at <= now()
            RETURNING lead_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("lead_id")).collect())
    }
}

fn parse_trigger_type(s: &str) -> Result<TriggerType> {
    Ok(match s {
        "event" => TriggerType::Event,
        "score_threshold" => TriggerType::ScoreThreshold,
        "intent_detected" => TriggerType::IntentDetected,
        "stage_change" => TriggerType::StageChange,
        "time_in_stage" => TriggerType::TimeInStage,
        other => {
            return Err(crate::error::LeadflowError::Internal(format!(
                "unknown trigger type: {other}"
            )))
        }
    })
}

fn parse_action_type(s: &str) -> Result<ActionType> {
    Ok(match s {
        "send_notification" => ActionType::SendNotification,
        "create_task" => ActionType::CreateTask,
        "update_field" => ActionType::UpdateField,
        "route_to_pipeline" => ActionType::RouteToPipeline,
        "sync_moco" => ActionType::SyncMoco,
        other => {
            return Err(crate::error::LeadflowError::Internal(format!(
                "unknown action type: {other}"
            )))
        }
    })
}

fn parse_stage_type(s: &str) -> Result<StageType> {
    Ok(match s {
        "entry" => StageType::Entry,
        "qualification" => StageType::Qualification,
        "negotiation" => StageType::Negotiation,
        "closing" => StageType::Closing,
        "won" => StageType::Won,
        "lost" => StageType::Lost,
        other => {
            return Err(crate::error::LeadflowError::Internal(format!(
                "unknown stage type: {other}"
            )))
        }
    })
}
