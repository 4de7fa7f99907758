//! The extraction instruction sent to the vision model.
//!
//! This prompt is the load-bearing artifact of the whole pipeline: the field
//! names, the closed set of fitness-verdict values, the bare-ICD-10 rule, and
//! the sentinel rule are all enforced here and nowhere else. The normalizer
//! parses the response with zero tolerance for schema drift, so the JSON
//! template at the end must match [`crate::schema::FIELD_KEYS`] exactly.
//!
//! Centralising it as a single constant keeps it testable: unit tests assert
//! that every schema key and every allowed verdict appears, without spinning
//! up a real model.

/// Instruction enumerating the ten target fields, their source sections, and
/// the formatting rules. Sent once per document, followed by the page images.
pub const EXTRACTION_PROMPT: &str = r#"Eres un experto extrayendo datos de certificados médicos ocupacionales escaneados.

EXTRAE EXACTAMENTE estos campos:

1. **aptitudMedica**: En sección "APTITUD MÉDICA" o similar. Valores posibles: APTO / APTO EN OBSERVACIÓN / APTO CON LIMITACIONES / NO APTO

2. **diagnostico1**: En sección "DIAGNÓSTICO" o "K. DIAGNÓSTICO", línea 1, descripción completa

3. **cie10_diagnostico1**: Código CIE-10 del diagnóstico 1 - SOLO el código (ej: I089, H521)

4. **observaciones1**: Observaciones del diagnóstico 1. Busca en "Observación", "Limitación", o "RECOMENDACIONES"

5. **diagnostico2**: Segundo diagnóstico si existe

6. **cie10_diagnostico2**: Código CIE-10 del diagnóstico 2

7. **observaciones2**: Observaciones del diagnóstico 2

8. **hallazgoMetabolico**: En "RESULTADOS EXÁMENES" busca valores metabólicos (glucosa, triglicéridos, colesterol). Incluye valor numérico

9. **hallazgoOsteomuscular**: En "EXAMEN FÍSICO" o resultados de Rx busca problemas de columna/articulaciones

10. **otrosAntecedentes**: En "ANTECEDENTES PERSONALES" lista cirugías y alergias

REGLAS IMPORTANTES:
- Copia el texto EXACTO del documento
- Para CIE-10: SOLO el código, sin prefijos (correcto: "I089", incorrecto: "CIE-10: I089")
- Si un campo no existe, usa: "No especificado"
- NO inventes datos
- El documento puede estar escaneado o con mala calidad, haz tu mejor esfuerzo

Responde SOLO con este JSON:
{
  "aptitudMedica": "...",
  "diagnostico1": "...",
  "cie10_diagnostico1": "...",
  "observaciones1": "...",
  "diagnostico2": "...",
  "cie10_diagnostico2": "...",
  "observaciones2": "...",
  "hallazgoMetabolico": "...",
  "hallazgoOsteomuscular": "...",
  "otrosAntecedentes": "..."
}"#;

/// The closed set of fitness-verdict values the prompt allows.
///
/// The normalizer deliberately does not validate membership — an out-of-set
/// value from the model passes through unchanged rather than being dropped.
pub const APTITUD_VALUES: [&str; 4] = [
    "APTO",
    "APTO EN OBSERVACIÓN",
    "APTO CON LIMITACIONES",
    "NO APTO",
];
