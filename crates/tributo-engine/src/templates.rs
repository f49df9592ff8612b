//! Template validation and the canonical template catalogue.
//!
//! A template's task definitions must form a strict partial order:
//! strictly positive execution orders and an acyclic `depends_on` graph.
//! The catalogue carries the fixed task lists and offset vectors of the
//! standard Chilean compliance workflows, used both by the seeder and as
//! an in-memory fallback when no database-resident template exists.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use uuid::Uuid;

use tributo_core::{ProcessType, RecurrenceType, TaskPriority, TaskType, TemplateId};
use tributo_store::{
    ExecutionConditions, ProcessTemplateRecord, ProcessTemplateTaskRecord, RecurrenceConfig,
    TemplateStatus,
};

use crate::error::EngineError;

/// Check that template tasks form a strict partial order.
pub fn validate_template_tasks(
    tasks: &[ProcessTemplateTaskRecord],
) -> Result<(), EngineError> {
    for task in tasks {
        if task.execution_order <= 0 {
            return Err(EngineError::NonPositiveOrder {
                title: task.task_title.clone(),
                order: task.execution_order,
            });
        }
    }

    // Depth-first search over depends_on, which may only reference tasks
    // of the same template.
    let by_id: HashMap<Uuid, &ProcessTemplateTaskRecord> =
        tasks.iter().map(|t| (t.id, t)).collect();
    let mut settled: HashSet<Uuid> = HashSet::new();

    for task in tasks {
        let mut path: HashSet<Uuid> = HashSet::new();
        if has_cycle(task, &by_id, &mut path, &mut settled) {
            return Err(EngineError::CyclicDependency(task.task_title.clone()));
        }
    }
    Ok(())
}

fn has_cycle(
    task: &ProcessTemplateTaskRecord,
    by_id: &HashMap<Uuid, &ProcessTemplateTaskRecord>,
    path: &mut HashSet<Uuid>,
    settled: &mut HashSet<Uuid>,
) -> bool {
    if settled.contains(&task.id) {
        return false;
    }
    if !path.insert(task.id) {
        return true;
    }
    for dep in &task.depends_on {
        if let Some(dependency) = by_id.get(dep) {
            if has_cycle(dependency, by_id, path, settled) {
                return true;
            }
        }
    }
    path.remove(&task.id);
    settled.insert(task.id);
    false
}

/// One task row of a catalogue definition.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub order: i32,
    pub title: &'static str,
    pub description: &'static str,
    pub task_type: TaskType,
    pub category: &'static str,
    pub estimated_hours: f32,
    pub offset_days: Option<i32>,
    pub from_previous: bool,
    pub optional: bool,
    pub parallel: bool,
    pub conditions: ExecutionConditions,
}

impl TaskDefinition {
    #[allow(clippy::too_many_arguments)]
    fn new(
        order: i32,
        title: &'static str,
        description: &'static str,
        task_type: TaskType,
        category: &'static str,
        estimated_hours: f32,
        offset_days: Option<i32>,
    ) -> Self {
        Self {
            order,
            title,
            description,
            task_type,
            category,
            estimated_hours,
            offset_days,
            from_previous: false,
            optional: false,
            parallel: false,
            conditions: ExecutionConditions::default(),
        }
    }

    fn from_previous(mut self) -> Self {
        self.from_previous = true;
        self
    }

    fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    fn after_completed(mut self) -> Self {
        self.conditions.previous_task_status = Some(tributo_core::TaskStatus::Completed);
        self
    }

    fn approval_gated(mut self) -> Self {
        self.conditions.require_approval = Some(true);
        self
    }
}

/// A full catalogue entry: the template header plus its task list.
#[derive(Debug, Clone)]
pub struct TemplateDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub process_type: ProcessType,
    pub recurrence_type: RecurrenceType,
    pub recurrence_config: RecurrenceConfig,
    pub template_config: serde_json::Value,
    pub tasks: Vec<TaskDefinition>,
}

impl TemplateDefinition {
    /// Build the persistable records, with fresh identifiers.
    pub fn build(&self) -> (ProcessTemplateRecord, Vec<ProcessTemplateTaskRecord>) {
        let template = ProcessTemplateRecord {
            id: TemplateId::new(),
            name: self.name.to_string(),
            description: self.description.to_string(),
            process_type: self.process_type,
            status: TemplateStatus::Active,
            default_recurrence_type: self.recurrence_type,
            default_recurrence_config: self.recurrence_config.clone(),
            template_config: self.template_config.clone(),
            available_variables: json!({}),
            default_values: json!({}),
            usage_count: 0,
            created_by: "system".to_string(),
        };
        let tasks = self
            .tasks
            .iter()
            .map(|def| {
                let mut task_config = json!({"category": def.category});
                if !def.conditions.is_empty() {
                    if let (Some(map), Ok(conditions)) = (
                        task_config.as_object_mut(),
                        serde_json::to_value(&def.conditions),
                    ) {
                        map.insert("execution_conditions".to_string(), conditions);
                    }
                }
                ProcessTemplateTaskRecord {
                    id: Uuid::new_v4(),
                    template_id: template.id,
                    execution_order: def.order,
                    task_title: def.title.to_string(),
                    task_description: def.description.to_string(),
                    task_type: def.task_type,
                    priority: TaskPriority::Normal,
                    is_optional: def.optional,
                    can_run_parallel: def.parallel,
                    due_date_offset_days: def.offset_days,
                    due_date_from_previous: def.from_previous,
                    absolute_due_date: None,
                    estimated_hours: rust_decimal::Decimal::try_from(def.estimated_hours).ok(),
                    depends_on: Vec::new(),
                    task_config,
                }
            })
            .collect();
        (template, tasks)
    }
}

/// The fixed builders for the standard workflows.
pub struct TemplateFactory;

impl TemplateFactory {
    /// Monthly VAT declaration, due the 12th of each month.
    pub fn f29_monthly() -> TemplateDefinition {
        use TaskType::{Automatic, Manual};
        TemplateDefinition {
            name: "F29 - Declaración Mensual IVA",
            description: "Proceso mensual para la declaración y pago del Formulario 29 (IVA). \
                 Incluye sincronización de documentos, cálculo automático, revisión y envío \
                 al SII. Vence el día 12 de cada mes.",
            process_type: ProcessType::TaxMonthly,
            recurrence_type: RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(12),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "form_type": "f29",
                "due_day": 12,
                "auto_generate": true,
                "notification_days": [10, 5, 3, 1],
                "requires_sii_credentials": true,
                "supports_auto_submission": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Sincronizar documentos del período",
                    "Descarga automática de facturas emitidas y recibidas desde el SII",
                    Automatic, "Sincronización", 1.0, Some(-10)),
                TaskDefinition::new(2, "Procesar documentos tributarios",
                    "Clasificación y cálculo automático de IVA de compras y ventas",
                    Automatic, "Documentos", 2.0, None).from_previous(),
                TaskDefinition::new(3, "Generar borrador F29",
                    "Generación automática del formulario F29 con los datos procesados",
                    Automatic, "Tributario", 1.0, Some(-7)).after_completed(),
                TaskDefinition::new(4, "Revisar y ajustar F29",
                    "Revisión manual del formulario generado y ajustes necesarios",
                    Manual, "Revisión", 4.0, Some(-5)),
                TaskDefinition::new(5, "Aprobar F29 para envío",
                    "Aprobación final del contribuyente antes del envío al SII",
                    Manual, "Revisión", 1.0, Some(-3)).after_completed(),
                TaskDefinition::new(6, "Enviar F29 al SII",
                    "Envío automático de la declaración al Servicio de Impuestos Internos",
                    Automatic, "Tributario", 0.5, Some(-1)).after_completed().approval_gated(),
                TaskDefinition::new(7, "Gestionar pago F29",
                    "Coordinación del pago de impuestos si corresponde",
                    Manual, "Pagos", 2.0, Some(0)).optional(),
                TaskDefinition::new(8, "Archivar comprobantes",
                    "Archivo de comprobantes de declaración y pago",
                    Automatic, "Documentos", 0.5, None).from_previous(),
            ],
        }
    }

    /// Annual income declaration, due 30 April of the following year.
    pub fn f22_annual() -> TemplateDefinition {
        use TaskType::{Automatic, Manual};
        TemplateDefinition {
            name: "F22 - Declaración Anual de Renta",
            description: "Proceso anual para la preparación y presentación del Formulario 22 \
                 (Declaración de Renta). Incluye consolidación de información anual, cálculos \
                 tributarios, revisión y envío al SII. Vence el 30 de abril.",
            process_type: ProcessType::TaxAnnual,
            recurrence_type: RecurrenceType::Annual,
            recurrence_config: RecurrenceConfig {
                month: Some(4),
                day: Some(30),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "form_type": "f22",
                "due_month": 4,
                "due_day": 30,
                "auto_generate": true,
                "notification_days": [60, 30, 15, 7, 3, 1],
                "requires_sii_credentials": true,
                "supports_auto_submission": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Recopilar información anual",
                    "Consolidación de toda la información tributaria del año",
                    Automatic, "Documentos", 8.0, Some(-60)),
                TaskDefinition::new(2, "Revisar consistencia F29",
                    "Verificación de que todos los F29 del año estén correctos",
                    Automatic, "Análisis", 4.0, None).from_previous().parallel(),
                TaskDefinition::new(3, "Calcular depreciación activos",
                    "Cálculo de depreciación de activos fijos para el período",
                    Manual, "Tributario", 6.0, Some(-45)).parallel(),
                TaskDefinition::new(4, "Preparar balance tributario",
                    "Elaboración del balance general con ajustes tributarios",
                    Manual, "Tributario", 16.0, Some(-30)),
                TaskDefinition::new(5, "Calcular RLI",
                    "Determinación de la Renta Líquida Imponible",
                    Manual, "Tributario", 8.0, Some(-20)),
                TaskDefinition::new(6, "Generar borrador F22",
                    "Generación del formulario F22 con todos los datos",
                    Automatic, "Tributario", 2.0, Some(-15)),
                TaskDefinition::new(7, "Revisión contador externo",
                    "Revisión y validación por contador externo si aplica",
                    Manual, "Revisión", 24.0, Some(-10)).optional(),
                TaskDefinition::new(8, "Aprobar F22",
                    "Aprobación final del contribuyente",
                    Manual, "Revisión", 2.0, Some(-5)),
                TaskDefinition::new(9, "Enviar F22 al SII",
                    "Envío de la declaración anual de renta",
                    Automatic, "Tributario", 1.0, Some(-2)),
                TaskDefinition::new(10, "Gestionar pago/devolución",
                    "Gestión del pago de impuestos o solicitud de devolución",
                    Manual, "Pagos", 4.0, Some(0)),
            ],
        }
    }

    /// Quarterly simplified-regime declaration, due day 20 after the
    /// quarter closes.
    pub fn f3323_quarterly() -> TemplateDefinition {
        use TaskType::{Automatic, Manual};
        TemplateDefinition {
            name: "F3323 - Declaración Trimestral Pro Pyme",
            description: "Proceso trimestral para el régimen simplificado Pro Pyme: \
                 consolidación de ingresos, validación de requisitos, cálculo de la base \
                 imponible y envío del Formulario 3323.",
            process_type: ProcessType::TaxQuarterly,
            recurrence_type: RecurrenceType::Quarterly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(20),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "form_type": "f3323",
                "due_day": 20,
                "auto_generate": true,
                "requires_sii_credentials": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Recopilar ingresos del trimestre",
                    "Consolidación de todos los ingresos del período trimestral",
                    Automatic, "Documentos", 2.0, Some(-15)),
                TaskDefinition::new(2, "Validar requisitos régimen Pro Pyme",
                    "Verificación del cumplimiento de requisitos para el régimen",
                    Automatic, "Tributario", 1.0, None).from_previous(),
                TaskDefinition::new(3, "Calcular base imponible",
                    "Determinación de la base imponible según régimen Pro Pyme",
                    Automatic, "Tributario", 1.0, Some(-12)),
                TaskDefinition::new(4, "Generar borrador F3323",
                    "Generación automática del formulario F3323",
                    Automatic, "Tributario", 0.5, Some(-10)),
                TaskDefinition::new(5, "Revisar y aprobar F3323",
                    "Revisión y aprobación del formulario por el contribuyente",
                    Manual, "Revisión", 2.0, Some(-5)),
                TaskDefinition::new(6, "Enviar F3323 al SII",
                    "Envío de la declaración trimestral Pro Pyme",
                    Automatic, "Tributario", 0.5, Some(-1)),
                TaskDefinition::new(7, "Gestionar pago F3323",
                    "Gestión del pago de impuestos trimestrales",
                    Manual, "Pagos", 2.0, Some(0)).optional(),
            ],
        }
    }

    /// Recurring document synchronisation chore.
    pub fn document_sync() -> TemplateDefinition {
        use TaskType::Automatic;
        TemplateDefinition {
            name: "Sincronización Mensual de Documentos",
            description: "Proceso automatizado para sincronizar documentos tributarios con \
                 el SII y mantener actualizada la información de facturas emitidas y \
                 recibidas.",
            process_type: ProcessType::DocumentSync,
            recurrence_type: RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(1),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "sync_type": "full",
                "auto_generate": true,
                "notification_on_errors": true,
                "requires_sii_credentials": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Sincronizar facturas emitidas",
                    "Descarga de facturas emitidas desde el SII",
                    Automatic, "Sincronización", 0.5, None).parallel(),
                TaskDefinition::new(1, "Sincronizar facturas recibidas",
                    "Descarga de facturas recibidas desde el SII",
                    Automatic, "Sincronización", 0.5, None).parallel(),
                TaskDefinition::new(2, "Procesar y clasificar documentos",
                    "Clasificación automática de documentos por tipo y categoría",
                    Automatic, "Documentos", 1.0, None),
                TaskDefinition::new(3, "Detectar inconsistencias",
                    "Identificación de documentos faltantes o con errores",
                    Automatic, "Análisis", 0.5, None),
                TaskDefinition::new(4, "Generar reporte de sincronización",
                    "Reporte con resumen de documentos procesados",
                    Automatic, "Análisis", 0.25, None),
            ],
        }
    }

    /// Monthly purchase-book review.
    pub fn iva_purchase_books() -> TemplateDefinition {
        use TaskType::{Automatic, Manual};
        TemplateDefinition {
            name: "Libro de Compras Mensual",
            description: "Proceso mensual para gestionar el libro de compras: descarga desde \
                 el SII, validación de facturas, clasificación de gastos y cálculo del IVA \
                 crédito fiscal.",
            process_type: ProcessType::Custom,
            recurrence_type: RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(10),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "book_type": "purchases",
                "due_day": 10,
                "auto_generate": true,
                "requires_sii_credentials": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Descargar libro de compras SII",
                    "Descarga del libro de compras desde el portal del SII",
                    Automatic, "Sincronización", 0.5, Some(-8)),
                TaskDefinition::new(2, "Validar facturas de compra",
                    "Verificación de validez y consistencia de facturas",
                    Automatic, "Documentos", 1.0, None).from_previous(),
                TaskDefinition::new(3, "Clasificar gastos",
                    "Clasificación de gastos por categoría contable",
                    Manual, "Tributario", 3.0, Some(-5)),
                TaskDefinition::new(4, "Calcular IVA crédito fiscal",
                    "Cálculo del IVA crédito fiscal del período",
                    Automatic, "Tributario", 0.5, Some(-4)),
                TaskDefinition::new(5, "Generar informe libro de compras",
                    "Generación del informe detallado del libro de compras",
                    Automatic, "Análisis", 0.5, Some(-3)),
            ],
        }
    }

    /// Monthly sales-book review.
    pub fn iva_sales_books() -> TemplateDefinition {
        use TaskType::{Automatic, Manual};
        TemplateDefinition {
            name: "Libro de Ventas Mensual",
            description: "Proceso mensual para gestionar el libro de ventas: descarga desde \
                 el SII, validación de documentos emitidos, conciliación y cálculo del IVA \
                 débito fiscal.",
            process_type: ProcessType::Custom,
            recurrence_type: RecurrenceType::Monthly,
            recurrence_config: RecurrenceConfig {
                day_of_month: Some(10),
                ..RecurrenceConfig::default()
            },
            template_config: json!({
                "book_type": "sales",
                "due_day": 10,
                "auto_generate": true,
                "requires_sii_credentials": true,
            }),
            tasks: vec![
                TaskDefinition::new(1, "Descargar libro de ventas SII",
                    "Descarga del libro de ventas desde el portal del SII",
                    Automatic, "Sincronización", 0.5, Some(-8)),
                TaskDefinition::new(2, "Validar facturas emitidas",
                    "Verificación de facturas, boletas y notas emitidas",
                    Automatic, "Documentos", 1.0, None).from_previous(),
                TaskDefinition::new(3, "Conciliar con sistema de facturación",
                    "Conciliación con el sistema interno de facturación",
                    Manual, "Tributario", 2.0, Some(-5)),
                TaskDefinition::new(4, "Calcular IVA débito fiscal",
                    "Cálculo del IVA débito fiscal del período",
                    Automatic, "Tributario", 0.5, Some(-4)),
                TaskDefinition::new(5, "Generar informe libro de ventas",
                    "Generación del informe detallado del libro de ventas",
                    Automatic, "Análisis", 0.5, Some(-3)),
            ],
        }
    }

    /// The whole catalogue, seeding order.
    pub fn all() -> Vec<TemplateDefinition> {
        vec![
            Self::f29_monthly(),
            Self::f22_annual(),
            Self::document_sync(),
            Self::iva_purchase_books(),
            Self::iva_sales_books(),
            Self::f3323_quarterly(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_templates_are_well_formed() {
        for definition in TemplateFactory::all() {
            let (template, tasks) = definition.build();
            assert!(template.is_available(), "{}", template.name);
            assert!(!tasks.is_empty(), "{}", template.name);
            validate_template_tasks(&tasks).expect(template.name.as_str());
            for task in &tasks {
                assert_eq!(task.template_id, template.id);
            }
        }
    }

    #[test]
    fn f29_offsets_match_the_monthly_workflow() {
        let (_, tasks) = TemplateFactory::f29_monthly().build();
        let offsets: Vec<Option<i32>> =
            tasks.iter().map(|t| t.due_date_offset_days).collect();
        assert_eq!(
            offsets,
            vec![
                Some(-10),
                None,
                Some(-7),
                Some(-5),
                Some(-3),
                Some(-1),
                Some(0),
                None
            ]
        );
        assert!(tasks[1].due_date_from_previous);
        assert!(tasks[6].is_optional);
    }

    #[test]
    fn non_positive_order_is_rejected() {
        let (_, mut tasks) = TemplateFactory::f29_monthly().build();
        tasks[0].execution_order = 0;
        assert!(matches!(
            validate_template_tasks(&tasks),
            Err(EngineError::NonPositiveOrder { .. })
        ));
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let (_, mut tasks) = TemplateFactory::f29_monthly().build();
        let (a, b) = (tasks[0].id, tasks[1].id);
        tasks[0].depends_on = vec![b];
        tasks[1].depends_on = vec![a];
        assert!(matches!(
            validate_template_tasks(&tasks),
            Err(EngineError::CyclicDependency(_))
        ));
    }

    #[test]
    fn valid_dependency_chain_passes() {
        let (_, mut tasks) = TemplateFactory::f29_monthly().build();
        let first = tasks[0].id;
        tasks[1].depends_on = vec![first];
        assert!(validate_template_tasks(&tasks).is_ok());
    }
}
